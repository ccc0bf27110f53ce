use IValidatorsExitBusOracle::IValidatorsExitBusOracleInstance;
use alloy_primitives::Address;
use alloy_rpc_types_eth::BlockId;
use alloy_sol_macro::sol;
use async_trait::async_trait;
use tracing::info;

use crate::{DefaultProvider, ExitRequest, ExitRequestOracle};

/// A log outside of the queried block range: the node served an inconsistent view.
#[derive(Debug, thiserror::Error)]
#[error("event at block {block:?} outside of requested range [{from}:{to}]")]
pub struct InconsistentEvents {
    /// Block of the offending log, if the node reported one
    pub block: Option<u64>,
    /// Range start
    pub from: u64,
    /// Range end
    pub to: u64,
}

/// Split the closed range `[from, to]` into consecutive closed windows
/// spanning at most `step + 1` blocks each.
pub fn search_windows(from: u64, to: u64, step: u64) -> Vec<(u64, u64)> {
    let mut windows = Vec::new();
    if from > to {
        return windows;
    }
    let mut left = from;
    loop {
        let right = to.min(left.saturating_add(step));
        windows.push((left, right));
        if right == to {
            break;
        }
        left = right + 1;
    }
    windows
}

/// A wrapper over the `ValidatorsExitBusOracle` contract.
#[derive(Debug, Clone)]
pub struct ExitBusOracle {
    contract: IValidatorsExitBusOracleInstance<DefaultProvider>,
    search_step: u64,
}

impl ExitBusOracle {
    /// Create a new `ExitBusOracle` instance. Event queries span at most
    /// `search_step` blocks per request.
    pub const fn new(address: Address, provider: DefaultProvider, search_step: u64) -> Self {
        Self { contract: IValidatorsExitBusOracleInstance::new(address, provider), search_step }
    }
}

#[async_trait]
impl ExitRequestOracle for ExitBusOracle {
    async fn total_requests_processed(&self, block: u64) -> eyre::Result<u64> {
        let total = self
            .contract
            .getTotalRequestsProcessed()
            .block(BlockId::number(block))
            .call()
            .await?;
        Ok(total.saturating_to())
    }

    async fn exit_requests(&self, from: u64, to: u64) -> eyre::Result<Vec<ExitRequest>> {
        if from > to {
            eyre::bail!("invalid block range: {from} > {to}");
        }

        let mut requests = Vec::new();
        for (left, right) in search_windows(from, to, self.search_step) {
            info!(from = left, to = right, "Fetching ValidatorExitRequest events");
            let logs = self
                .contract
                .ValidatorExitRequest_filter()
                .from_block(left)
                .to_block(right)
                .query()
                .await?;

            for (event, log) in logs {
                let block = log.block_number;
                if !block.is_some_and(|number| (left..=right).contains(&number)) {
                    return Err(InconsistentEvents { block, from: left, to: right }.into());
                }
                requests.push(ExitRequest {
                    block_number: block.unwrap_or(left),
                    module_id: event.stakingModuleId.saturating_to(),
                    operator_id: event.nodeOperatorId.saturating_to(),
                    validator_index: event.validatorIndex.saturating_to(),
                });
            }
        }
        Ok(requests)
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    interface IValidatorsExitBusOracle {
        event ValidatorExitRequest(
            uint256 indexed stakingModuleId,
            uint256 indexed nodeOperatorId,
            uint256 indexed validatorIndex,
            bytes validatorPubkey,
            uint256 timestamp
        );

        function getTotalRequestsProcessed() external view returns (uint256);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_range_without_overlap() {
        assert_eq!(search_windows(0, 25, 10), vec![(0, 10), (11, 21), (22, 25)]);
        assert_eq!(search_windows(5, 5, 10), vec![(5, 5)]);
        assert_eq!(search_windows(0, 10, 10), vec![(0, 10)]);
    }

    #[test]
    fn empty_for_inverted_range() {
        assert!(search_windows(10, 5, 3).is_empty());
    }

    #[test]
    fn inconsistent_events_message() {
        let err = InconsistentEvents { block: Some(42), from: 0, to: 10 };
        assert_eq!(err.to_string(), "event at block Some(42) outside of requested range [0:10]");
    }
}
