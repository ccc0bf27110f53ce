use std::{collections::BTreeMap, iter};

use alerting::{AlertBuilder, SentAlerts, Severity};
use async_trait::async_trait;
use eyre::Result;
use primitives::{ChainReorgEvent, Head};
use tracing::{debug, warn};

use super::{Handler, WatcherContext};

const UNHANDLED_CHAIN_REORG: AlertBuilder =
    AlertBuilder::new("UnhandledChainReorg", Severity::Info);
const UNHANDLED_HEAD: AlertBuilder = AlertBuilder::new("UnhandledHead", Severity::Info);

/// Alerts when a reorg or a new head cannot be linked to the handled headers.
///
/// Pending reorgs are drained in ascending slot order every cycle. The head's
/// parent is checked only if no reorg alert fired in the same cycle.
#[derive(Debug, Default)]
pub struct ForkHandler {
    sent: SentAlerts,
}

#[async_trait]
impl Handler for ForkHandler {
    fn name(&self) -> &'static str {
        "fork"
    }

    async fn handle(&mut self, ctx: &WatcherContext, head: &Head) -> Result<()> {
        let reorgs = ctx.state.drain_reorgs().await;
        let handled = ctx.state.handled_headers().await;
        let known = |root: &str| {
            handled.iter().map(|h| &**h).chain(iter::once(head)).find(|h| h.root() == root)
        };

        let mut alerted = false;
        for reorg in reorgs {
            let linked = known(&reorg.new_head_block).is_some_and(|new_head| {
                known(new_head.parent_root()).is_some()
            });
            if linked {
                debug!(slot = reorg.slot, depth = reorg.depth, "Reorg is covered by handled headers");
                continue;
            }
            warn!(slot = reorg.slot, depth = reorg.depth, "Unhandled chain reorg");
            self.send_reorg_alert(ctx, &reorg).await?;
            alerted = true;
        }

        let Some(last) = handled.last() else { return Ok(()) };
        if !alerted && known(head.parent_root()).is_none() {
            let missing = head.slot().saturating_sub(last.slot() + 1);
            warn!(slot = head.slot(), parent = head.parent_root(), missing, "Head parent was not handled");
            let summary = "🔗‍🔀Unhandled head: parent block was not handled";
            let description = format!(
                "Parent {} of slot {} is not among handled headers.\nSlots since the last handled one: {missing}",
                head.parent_root(),
                ctx.links.slot(head.slot()),
            );
            let alert = UNHANDLED_HEAD.build(summary, description, &BTreeMap::new());
            self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        }
        Ok(())
    }
}

impl ForkHandler {
    async fn send_reorg_alert(&mut self, ctx: &WatcherContext, reorg: &ChainReorgEvent) -> Result<()> {
        let links = reorg.affected_slots().map(|slot| ctx.links.slot(slot)).collect::<Vec<_>>();
        let summary = "🔗‍🔀Unhandled slots after chain reorganization";
        let description = format!(
            "Reorg depth is {} slots.\nPlease, check possible unhandled slots: {}",
            reorg.depth,
            links.join("\n")
        );
        let alert = UNHANDLED_CHAIN_REORG.build(summary, description, &BTreeMap::new());
        self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        Ok(())
    }
}
