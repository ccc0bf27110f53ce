use std::collections::BTreeMap;

use alerting::{AlertBuilder, SentAlerts, Severity};
use async_trait::async_trait;
use eyre::Result;
use primitives::{ConsolidationRequest, Head, NamedKey, OwnedKeys};
use tracing::{debug, info};

use super::{Handler, WatcherContext, group_by};

/// Category of a consolidation request. The first matching predicate wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationCategory {
    /// Requested from a valid withdrawal address
    SourceWithdrawalAddress,
    /// Source validator is owned
    OwnedSource,
    /// Target validator is owned
    OwnedTarget,
}

impl ConsolidationCategory {
    /// Classify a request, `None` when it does not concern us.
    pub fn of(ctx: &WatcherContext, keys: &OwnedKeys, request: &ConsolidationRequest) -> Option<Self> {
        if ctx.is_valid_withdrawal_address(&request.source_address) {
            Some(Self::SourceWithdrawalAddress)
        } else if keys.contains_key(&NamedKey::normalize(&request.source_pubkey)) {
            Some(Self::OwnedSource)
        } else if keys.contains_key(&NamedKey::normalize(&request.target_pubkey)) {
            Some(Self::OwnedTarget)
        } else {
            None
        }
    }

    const fn alert(self) -> (AlertBuilder, &'static str) {
        match self {
            Self::SourceWithdrawalAddress => (
                AlertBuilder::new("HeadWatcherConsolidationSourceWithdrawalAddress", Severity::Critical),
                "‼️⛔️Validator consolidation was requested from Withdrawal Vault source address",
            ),
            Self::OwnedSource => (
                AlertBuilder::new("HeadWatcherConsolidationUserSourcePubkey", Severity::Info),
                "⚠️Consolidation was requested for our validators",
            ),
            Self::OwnedTarget => (
                AlertBuilder::new("HeadWatcherConsolidationUserTargetPubkey", Severity::Info),
                "⚠️Someone attempts to consolidate their validators to our validators",
            ),
        }
    }
}

/// Alerts on consolidation requests from our addresses or involving our validators.
#[derive(Debug, Default)]
pub struct ConsolidationHandler {
    sent: SentAlerts,
}

#[async_trait]
impl Handler for ConsolidationHandler {
    fn name(&self) -> &'static str {
        "consolidation"
    }

    async fn handle(&mut self, ctx: &WatcherContext, head: &Head) -> Result<()> {
        let requests = head.consolidation_requests();
        if requests.is_empty() {
            debug!(slot = head.slot(), "No consolidation requests in block");
            return Ok(());
        }

        let keys = ctx.state.owned_keys().await;
        let categorized = requests.iter().filter_map(|request| {
            ConsolidationCategory::of(ctx, &keys, request).map(|category| (category, request))
        });

        for (category, requests) in group_by(categorized) {
            info!(slot = head.slot(), ?category, count = requests.len(), "Consolidation requests");
            let mut description = requests
                .into_iter()
                .map(|request| {
                    format!(
                        "\nsource_address: {} | source_pubkey: {} | target_pubkey: {}",
                        request.source_address,
                        ctx.links.pubkey(&request.source_pubkey, &keys),
                        ctx.links.pubkey(&request.target_pubkey, &keys),
                    )
                })
                .collect::<String>();
            description.push_str(&format!("\n\nslot: {}", ctx.links.slot(head.slot())));

            let (builder, summary) = category.alert();
            let alert = builder.build(summary, description, &BTreeMap::new());
            self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        }
        Ok(())
    }
}
