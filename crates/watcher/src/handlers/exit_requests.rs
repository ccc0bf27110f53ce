use std::collections::BTreeMap;

use chainio::{ExitRequest, ExitRequestOracle};
use eyre::Result;
use primitives::{BlockNumber, ValidatorIdx};
use tracing::{debug, info};

/// Exit requests announced by the exit bus oracle within a window of recent blocks.
///
/// Refreshed only when the oracle's processed-requests counter grows. Entries older
/// than the window are purged on every successful refresh.
#[derive(Debug, Clone)]
pub struct ExitRequestsCache {
    lookback: u64,
    by_block: BTreeMap<BlockNumber, Vec<ExitRequest>>,
    last_total: u64,
    last_scanned: Option<BlockNumber>,
}

impl ExitRequestsCache {
    /// Cache covering the last `lookback` blocks.
    pub const fn new(lookback: u64) -> Self {
        Self { lookback, by_block: BTreeMap::new(), last_total: 0, last_scanned: None }
    }

    /// Bring the cache up to `block`.
    pub async fn refresh(&mut self, oracle: &dyn ExitRequestOracle, block: BlockNumber) -> Result<()> {
        let total = oracle.total_requests_processed(block).await?;
        let oldest = block.saturating_sub(self.lookback);
        if total <= self.last_total {
            debug!(total, block, "No new exit requests processed");
            self.purge(oldest);
            return Ok(());
        }

        let from = self.last_scanned.map_or(oldest, |scanned| (scanned + 1).max(oldest));
        if from <= block {
            let requests = oracle.exit_requests(from, block).await?;
            info!(from, to = block, count = requests.len(), "Fetched exit requests");
            for request in requests {
                self.by_block.entry(request.block_number).or_default().push(request);
            }
        }

        self.last_total = total;
        self.last_scanned = Some(block);
        self.purge(oldest);
        Ok(())
    }

    fn purge(&mut self, oldest: BlockNumber) {
        self.by_block = self.by_block.split_off(&oldest);
    }

    /// Whether an exit of `validator` was requested for the `(module, operator)` pair.
    pub fn is_expected(&self, module: u64, operator: u64, validator: ValidatorIdx) -> bool {
        self.by_block.values().flatten().any(|request| {
            request.module_id == module &&
                request.operator_id == operator &&
                request.validator_index == validator
        })
    }

    /// Number of cached requests.
    pub fn len(&self) -> usize {
        self.by_block.values().map(Vec::len).sum()
    }

    /// Whether no request is cached.
    pub fn is_empty(&self) -> bool {
        self.by_block.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Oracle serving a fixed set of requests and a settable counter.
    #[derive(Debug, Default)]
    pub(crate) struct StaticOracle {
        pub(crate) total: Mutex<u64>,
        pub(crate) requests: Vec<ExitRequest>,
        pub(crate) queried: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl ExitRequestOracle for StaticOracle {
        async fn total_requests_processed(&self, _block: u64) -> Result<u64> {
            Ok(*self.total.lock().unwrap())
        }

        async fn exit_requests(&self, from: u64, to: u64) -> Result<Vec<ExitRequest>> {
            self.queried.lock().unwrap().push((from, to));
            Ok(self
                .requests
                .iter()
                .filter(|request| (from..=to).contains(&request.block_number))
                .copied()
                .collect())
        }
    }

    pub(crate) const fn request(block_number: u64, validator_index: u64) -> ExitRequest {
        ExitRequest { block_number, module_id: 1, operator_id: 0, validator_index }
    }

    #[tokio::test]
    async fn scans_window_once_counter_grows() {
        let oracle = StaticOracle {
            total: Mutex::new(1),
            requests: vec![request(500, 7), request(950, 8)],
            ..Default::default()
        };
        let mut cache = ExitRequestsCache::new(100);

        cache.refresh(&oracle, 1_000).await.unwrap();
        assert!(cache.is_expected(1, 0, 8));
        assert!(!cache.is_expected(1, 0, 7));
        assert!(!cache.is_expected(2, 0, 8));

        cache.refresh(&oracle, 1_010).await.unwrap();
        assert_eq!(*oracle.queried.lock().unwrap(), vec![(900, 1_000)]);

        *oracle.total.lock().unwrap() = 2;
        cache.refresh(&oracle, 1_020).await.unwrap();
        assert_eq!(oracle.queried.lock().unwrap().last(), Some(&(1_001, 1_020)));
    }

    #[tokio::test]
    async fn purges_entries_outside_window() {
        let oracle = StaticOracle {
            total: Mutex::new(1),
            requests: vec![request(950, 8)],
            ..Default::default()
        };
        let mut cache = ExitRequestsCache::new(100);
        cache.refresh(&oracle, 1_000).await.unwrap();
        assert_eq!(cache.len(), 1);

        *oracle.total.lock().unwrap() = 2;
        cache.refresh(&oracle, 1_100).await.unwrap();
        assert!(cache.is_empty());
        assert!(!cache.is_expected(1, 0, 8));
    }

    #[tokio::test]
    async fn purges_window_while_counter_is_flat() {
        let oracle = StaticOracle {
            total: Mutex::new(1),
            requests: vec![request(950, 8)],
            ..Default::default()
        };
        let mut cache = ExitRequestsCache::new(100);
        cache.refresh(&oracle, 1_000).await.unwrap();
        assert!(cache.is_expected(1, 0, 8));

        cache.refresh(&oracle, 1_500).await.unwrap();
        assert!(cache.is_empty());
        assert!(!cache.is_expected(1, 0, 8));
        assert_eq!(oracle.queried.lock().unwrap().len(), 1);
    }
}
