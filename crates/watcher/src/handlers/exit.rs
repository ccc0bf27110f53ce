use std::{collections::{BTreeMap, HashSet}, sync::Arc};

use alerting::{AlertBuilder, SentAlerts, Severity};
use async_trait::async_trait;
use chainio::ExitRequestOracle;
use eyre::Result;
use primitives::{Head, NamedKey, ValidatorIdx};
use tracing::{debug, error, info};

use super::{ExitRequestsCache, Handler, Owner, WatcherContext, group_by};

const USER_UNEXPECTED_EXIT: AlertBuilder =
    AlertBuilder::new("HeadWatcherUserUnexpectedExit", Severity::Critical);
const UNKNOWN_EXIT: AlertBuilder = AlertBuilder::new("HeadWatcherUnknownExit", Severity::Critical);

/// Alerts on voluntary exits of owned validators that were not requested on-chain,
/// and on exits of validators missing from the index.
#[derive(Debug)]
pub struct ExitHandler {
    oracle: Option<Arc<dyn ExitRequestOracle>>,
    requests: ExitRequestsCache,
    disabled_modules: HashSet<u64>,
    sent: SentAlerts,
}

impl ExitHandler {
    /// Handler checking owned exits against `oracle` over the last `lookback` blocks.
    ///
    /// Without an oracle every owned exit is unexpected.
    pub fn new(oracle: Option<Arc<dyn ExitRequestOracle>>, lookback: u64) -> Self {
        Self {
            oracle,
            requests: ExitRequestsCache::new(lookback),
            disabled_modules: HashSet::new(),
            sent: SentAlerts::default(),
        }
    }

    /// Do not alert on owned exits of these modules.
    pub fn with_disabled_modules(mut self, modules: impl IntoIterator<Item = u64>) -> Self {
        self.disabled_modules = modules.into_iter().collect();
        self
    }

    async fn refresh_requests(&mut self, block: u64) {
        let Some(oracle) = &self.oracle else { return };
        if let Err(err) = self.requests.refresh(oracle.as_ref(), block).await {
            error!(block, %err, "Failed to refresh exit requests");
        }
    }
}

#[async_trait]
impl Handler for ExitHandler {
    fn name(&self) -> &'static str {
        "exit"
    }

    async fn handle(&mut self, ctx: &WatcherContext, head: &Head) -> Result<()> {
        let validators = ctx.state.validators().await;
        let keys = ctx.state.owned_keys().await;

        let mut owned: Vec<(ValidatorIdx, NamedKey)> = Vec::new();
        let mut unknown = Vec::new();
        for exit in &head.body().voluntary_exits {
            let index = exit.message.validator_index;
            match Owner::of(index, &validators, &keys) {
                Owner::Owned(key) if self.disabled_modules.contains(&key.module_index) => {
                    debug!(index, module = key.module_index, "Exit alerts disabled for module");
                }
                Owner::Owned(key) => owned.push((index, key)),
                Owner::Unknown => unknown.push(index),
                Owner::Other => {}
            }
        }
        if owned.is_empty() && unknown.is_empty() {
            debug!(slot = head.slot(), "No exits in block");
            return Ok(());
        }
        info!(slot = head.slot(), owned = owned.len(), unknown = unknown.len(), "Exits in block");
        let slot_line = format!("\n\nslot: {}", ctx.links.slot(head.slot()));

        if !owned.is_empty() {
            if let Some(block) = head.block_number() {
                self.refresh_requests(block).await;
            }
            let unexpected = owned
                .into_iter()
                .filter(|(index, key)| {
                    !self.requests.is_expected(key.module_index, key.operator_index, *index)
                })
                .map(|(index, key)| (key.operator_name, index))
                .collect::<Vec<_>>();

            if !unexpected.is_empty() {
                let summary = format!(
                    "🚨🚨🚨 {} Our validators were unexpected exited! 🚨🚨🚨",
                    unexpected.len()
                );
                let mut description = group_by(unexpected)
                    .into_iter()
                    .map(|(operator, indices)| format!("\n{operator} -{}", ctx.links.validators(&indices)))
                    .collect::<String>();
                description.push_str(&slot_line);
                let alert = USER_UNEXPECTED_EXIT.build(summary, description, &ctx.additional_labels);
                self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
            }
        }

        if !unknown.is_empty() {
            let summary = format!("🚨 {} unknown validators were exited!", unknown.len());
            let description = ctx.links.validators(&unknown) + &slot_line;
            let alert = UNKNOWN_EXIT.build(summary, description, &BTreeMap::new());
            self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use primitives::{SignedVoluntaryExit, beacon::VoluntaryExit};

    use super::*;
    use crate::{
        handlers::{
            exit_requests::tests::{StaticOracle, request},
            tests::context,
        },
        state::tests::{empty_body, head_with_body},
    };

    fn head(indices: &[u64]) -> Head {
        let mut body = empty_body();
        body.voluntary_exits = indices
            .iter()
            .map(|&validator_index| SignedVoluntaryExit { message: VoluntaryExit { validator_index } })
            .collect();
        head_with_body(100, "0xroot", "0xparent", body)
    }

    fn oracle(requests: Vec<chainio::ExitRequest>) -> Arc<dyn ExitRequestOracle> {
        Arc::new(StaticOracle { total: Mutex::new(1), requests, ..Default::default() })
    }

    #[tokio::test]
    async fn requested_exit_is_expected() {
        let (ctx, sink) = context().await;
        let mut handler = ExitHandler::new(Some(oracle(vec![request(990, 1)])), 100);

        handler.handle(&ctx, &head(&[1])).await.unwrap();
        assert!(sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn unrequested_exit_alerts() {
        let (ctx, sink) = context().await;
        let mut handler = ExitHandler::new(Some(oracle(vec![request(990, 5)])), 100);

        handler.handle(&ctx, &head(&[1, 2])).await.unwrap();

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].labels.alertname.starts_with("HeadWatcherUserUnexpectedExit"));
        assert_eq!(alerts[0].labels.severity, Severity::Critical);
        assert_eq!(alerts[0].annotations.summary, "🚨🚨🚨 1 Our validators were unexpected exited! 🚨🚨🚨");
        assert_eq!(
            alerts[0].annotations.description,
            "\nOperator A -[[1](http://mainnet.beaconcha.in/validator/1)]\
             \n\nslot: [100](https://mainnet.beaconcha.in/slot/100)"
        );
    }

    #[tokio::test]
    async fn unknown_exit_alerts_without_oracle() {
        let (ctx, sink) = context().await;
        ExitHandler::new(None, 100).handle(&ctx, &head(&[42])).await.unwrap();

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].labels.alertname.starts_with("HeadWatcherUnknownExit"));
        assert_eq!(alerts[0].annotations.summary, "🚨 1 unknown validators were exited!");
        assert!(alerts[0].annotations.description.starts_with("[[42](http://mainnet.beaconcha.in/validator/42)]"));
    }

    #[tokio::test]
    async fn disabled_module_suppresses_owned_exits_only() {
        let (ctx, sink) = context().await;
        let mut handler = ExitHandler::new(None, 100).with_disabled_modules([1]);

        handler.handle(&ctx, &head(&[1])).await.unwrap();
        assert!(sink.alerts().is_empty());

        handler.handle(&ctx, &head(&[1, 42])).await.unwrap();
        assert_eq!(sink.alerts().len(), 1);
        assert!(sink.alerts()[0].labels.alertname.starts_with("HeadWatcherUnknownExit"));
    }
}
