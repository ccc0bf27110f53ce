use std::{sync::Arc, time::{Duration, Instant}};

use eyre::Result;
use futures::future::join_all;
use keys_source::KeySource;
use metrics::{Metrics, Status, gauge_value};
use network::{ConsensusClient, ProviderError, http_provider::ForceUseFallback};
use primitives::{
    BlockHeaderResponse, BlockId, Head, SECONDS_PER_SLOT, Slot, slot_start_time,
};
use runtime::Heartbeat;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tracing::{debug, error, info};

use crate::{
    Handler, WatcherContext,
    refresh::{refresh_keys, refresh_validators, unix_now},
    reorg_listener,
};

/// A head is stale once it lags the wall clock by more than 4 slots.
const STALE_HEAD_SLOTS: u64 = 4;

/// Whether the head at `slot` lags `now` too much to be trusted.
pub const fn is_stale_head(genesis_time: u64, slot: Slot, now: u64) -> bool {
    now.saturating_sub(slot_start_time(genesis_time, slot)) > STALE_HEAD_SLOTS * SECONDS_PER_SLOT
}

/// Whether `err` reports a slot without a block.
pub fn is_missing_slot(err: &eyre::Report) -> bool {
    err.downcast_ref::<ProviderError>().is_some_and(ProviderError::is_not_found)
}

/// Whether a background task slot can take a new task.
fn is_idle(task: Option<&JoinHandle<()>>) -> bool {
    task.is_none_or(JoinHandle::is_finished)
}

/// Polls the chain head and runs every handler against each new one.
///
/// Owned keys and the validator index are refreshed in background tasks started
/// at most once at a time. Reorg events are collected by a separate listener.
#[derive(Debug)]
pub struct Watcher {
    consensus: ConsensusClient,
    keys_source: Arc<Mutex<Box<dyn KeySource>>>,
    handlers: Vec<Box<dyn Handler>>,
    context: WatcherContext,
    metrics: Arc<Metrics>,
    genesis_time: u64,
    cycle_sleep: Duration,
    heartbeat: Option<Heartbeat>,
    keys_updater: Option<JoinHandle<()>>,
    validators_updater: Option<JoinHandle<()>>,
    reorg_listener: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Create a watcher. Reads the genesis time from the consensus node.
    pub async fn new(
        consensus: ConsensusClient,
        keys_source: Box<dyn KeySource>,
        handlers: Vec<Box<dyn Handler>>,
        context: WatcherContext,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let genesis = consensus.get_genesis().await?;
        metrics.genesis_time.set(gauge_value(genesis.genesis_time));
        Ok(Self {
            consensus,
            keys_source: Arc::new(Mutex::new(keys_source)),
            handlers,
            context,
            metrics,
            genesis_time: genesis.genesis_time,
            cycle_sleep: Duration::from_secs(1),
            heartbeat: None,
            keys_updater: None,
            validators_updater: None,
            reorg_listener: None,
        })
    }

    /// Pause between cycles.
    pub const fn with_cycle_sleep(mut self, cycle_sleep: Duration) -> Self {
        self.cycle_sleep = cycle_sleep;
        self
    }

    /// Beat `heartbeat` after every handled head.
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Shared handler context.
    pub const fn context(&self) -> &WatcherContext {
        &self.context
    }

    fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    /// Follow the chain head forever. Errors are logged and the cycle retried.
    pub async fn run(mut self) -> Result<()> {
        info!(handlers = ?self.handler_names(), "Watcher started");
        loop {
            self.ensure_reorg_listener();
            match self.cycle(&BlockId::Head).await {
                Ok(true) => {}
                Ok(false) => debug!(sleep = ?self.cycle_sleep, "No new head"),
                Err(err) => error!(%err, "Error while handling head"),
            }
            sleep(self.cycle_sleep).await;
        }
    }

    /// Handle every slot of `slots` in order, waiting for the refreshers after each one.
    ///
    /// Slots without a block are skipped.
    pub async fn run_slots(mut self, slots: impl IntoIterator<Item = Slot>) -> Result<()> {
        info!(handlers = ?self.handler_names(), "Watcher started in slots range mode");
        for slot in slots {
            match self.cycle(&BlockId::Slot(slot)).await {
                Ok(_) => {}
                Err(err) if is_missing_slot(&err) => debug!(slot, "Slot has no block"),
                Err(err) => return Err(err),
            }
            self.await_refreshers().await;
        }
        Ok(())
    }

    /// Handle the block at `block_id`. Returns `false` if it was handled already.
    async fn cycle(&mut self, block_id: &BlockId) -> Result<bool> {
        let Some(head) = self.next_head(block_id).await? else {
            return Ok(false);
        };
        let slot = head.slot();
        let block_number = head.block_number();
        self.kick_refreshers(slot);

        info!(slot, "New head");
        self.handle_head(head).await?;

        self.metrics.slot_number.set(gauge_value(slot));
        if let Some(block_number) = block_number {
            self.metrics.block_number.set(gauge_value(block_number));
        }
        info!(slot, "Head is handled");
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.beat();
        }
        Ok(true)
    }

    /// Fetch the header and block at `block_id`, or `None` if that slot was just handled.
    async fn next_head(&self, block_id: &BlockId) -> Result<Option<Head>> {
        let started = Instant::now();
        let result = self.fetch_head(block_id).await;
        self.metrics.observe_task("get_header_full_info", Status::of(&result), started.elapsed());
        result
    }

    async fn fetch_head(&self, block_id: &BlockId) -> Result<Option<Head>> {
        let last_slot = self.context.state.last_handled_slot().await;
        let genesis_time = self.genesis_time;
        let stale = move |header: &BlockHeaderResponse| {
            last_slot.is_some() && is_stale_head(genesis_time, header.slot(), unix_now())
        };
        let force_use_fallback = block_id
            .is_head()
            .then_some(&stale as ForceUseFallback<'_, BlockHeaderResponse>);

        let header = self.consensus.get_block_header(block_id, force_use_fallback).await?;
        if last_slot == Some(header.slot()) {
            return Ok(None);
        }
        let block = self.consensus.get_block_details(&BlockId::Root(header.root.clone())).await?;
        Ok(Some(Head::new(header, block)))
    }

    fn ensure_reorg_listener(&mut self) {
        if is_idle(self.reorg_listener.as_ref()) {
            let state = Arc::clone(&self.context.state);
            self.reorg_listener = Some(reorg_listener::spawn(self.consensus.clone(), state));
        }
    }

    fn kick_refreshers(&mut self, slot: Slot) {
        let state = &self.context.state;
        if is_idle(self.keys_updater.as_ref()) {
            self.keys_updater = Some(tokio::spawn(refresh_keys(
                Arc::clone(&self.keys_source),
                Arc::clone(state),
                Arc::clone(&self.metrics),
                slot,
            )));
        }
        if is_idle(self.validators_updater.as_ref()) {
            self.validators_updater = Some(tokio::spawn(refresh_validators(
                self.consensus.clone(),
                Arc::clone(state),
                Arc::clone(&self.metrics),
                self.genesis_time,
            )));
        }
    }

    async fn await_refreshers(&mut self) {
        for updater in [self.keys_updater.take(), self.validators_updater.take()].into_iter().flatten() {
            if let Err(err) = updater.await {
                error!(%err, "Refresher task failed");
            }
        }
    }

    /// Run all handlers concurrently, then remember the head.
    async fn handle_head(&mut self, head: Head) -> Result<()> {
        let started = Instant::now();
        let context = &self.context;
        let metrics = &self.metrics;
        let results = join_all(self.handlers.iter_mut().map(|handler| {
            let head = &head;
            async move {
                let started = Instant::now();
                let result = handler.handle(context, head).await;
                metrics.observe_task(handler.name(), Status::of(&result), started.elapsed());
                result.map_err(|err| err.wrap_err(format!("{} handler failed", handler.name())))
            }
        }))
        .await;
        let result = results.into_iter().collect::<Result<Vec<()>>>();
        self.metrics.observe_task("handle_head", Status::of(&result), started.elapsed());
        result?;

        self.context.state.push_handled(Arc::new(head)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mockito::{Matcher, Server, ServerGuard};
    use network::RequestPolicy;
    use primitives::OwnedKeys;
    use reqwest::Url;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;

    /// Key source that blocks every update until the gate opens.
    #[derive(Debug, Default)]
    struct GatedSource {
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl KeySource for GatedSource {
        async fn update_keys(&mut self) -> Result<Option<OwnedKeys>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(None)
        }
    }

    async fn watcher(server: &mut ServerGuard, keys_source: Box<dyn KeySource>) -> Watcher {
        server
            .mock("GET", "/eth/v1/beacon/genesis")
            .with_body(
                json!({"data": {"genesis_time": "1606824023", "genesis_validators_root": "0x00"}})
                    .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/eth/v1/beacon/states/head/validators")
            .with_body(json!({"data": []}).to_string())
            .create_async()
            .await;
        let consensus = ConsensusClient::new(
            vec![Url::parse(&server.url()).unwrap()],
            RequestPolicy::new(Duration::from_secs(2), 0, Duration::ZERO),
            None,
        )
        .unwrap();
        let (context, _) = crate::handlers::tests::context().await;
        let metrics = Arc::new(Metrics::new("test_watcher").unwrap());
        Watcher::new(consensus, keys_source, Vec::new(), context, metrics).await.unwrap()
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn idle_only_without_running_task() {
        assert!(is_idle(None));

        let pending = tokio::spawn(std::future::pending::<()>());
        assert!(!is_idle(Some(&pending)));
        pending.abort();

        let done = tokio::spawn(async {});
        wait_for(|| done.is_finished()).await;
        assert!(is_idle(Some(&done)));
    }

    #[tokio::test]
    async fn busy_refresher_is_not_restarted() {
        let mut server = Server::new_async().await;
        let source = GatedSource::default();
        let (calls, gate) = (Arc::clone(&source.calls), Arc::clone(&source.gate));
        let mut watcher = watcher(&mut server, Box::new(source)).await;

        watcher.kick_refreshers(10);
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;
        watcher.kick_refreshers(11);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        watcher.await_refreshers().await;
        watcher.kick_refreshers(12);
        wait_for(|| calls.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test]
    async fn finished_reorg_listener_is_restarted() {
        let mut server = Server::new_async().await;
        let events = server
            .mock("GET", "/eth/v1/events")
            .match_query(Matcher::Any)
            .with_header("content-type", "text/event-stream")
            .with_body("")
            .expect(2)
            .create_async()
            .await;
        let mut watcher = watcher(&mut server, Box::new(GatedSource::default())).await;

        watcher.ensure_reorg_listener();
        wait_for(|| watcher.reorg_listener.as_ref().is_some_and(JoinHandle::is_finished)).await;
        watcher.ensure_reorg_listener();
        wait_for(|| watcher.reorg_listener.as_ref().is_some_and(JoinHandle::is_finished)).await;

        events.assert_async().await;
    }

    #[test]
    fn head_older_than_four_slots_is_stale() {
        let genesis = 1_000;
        let slot_start = slot_start_time(genesis, 10);
        assert!(!is_stale_head(genesis, 10, slot_start + 48));
        assert!(is_stale_head(genesis, 10, slot_start + 49));
        assert!(!is_stale_head(genesis, 10, slot_start - 5));
    }

    #[test]
    fn not_found_is_missing_slot() {
        let missing = eyre::Report::new(ProviderError::NotOk {
            endpoint: "eth/v1/beacon/headers/7".to_owned(),
            status: 404,
            text: String::new(),
        });
        assert!(is_missing_slot(&missing));

        let failed = eyre::Report::new(ProviderError::NotOk {
            endpoint: "eth/v1/beacon/headers/7".to_owned(),
            status: 500,
            text: String::new(),
        });
        assert!(!is_missing_slot(&failed));
        assert!(!is_missing_slot(&eyre::eyre!("boom")));
    }
}
