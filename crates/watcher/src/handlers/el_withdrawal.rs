use std::collections::BTreeMap;

use alerting::{AlertBuilder, SentAlerts, Severity};
use async_trait::async_trait;
use eyre::Result;
use primitives::{Head, NamedKey, WithdrawalRequest};
use tracing::{debug, info};

use super::{Handler, WatcherContext, group_by};

/// Category of an EL triggered withdrawal, by source address and validator ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalCategory {
    /// Valid source, owned validator, full exit
    Full,
    /// Valid source, owned validator, partial amount
    Partial,
    /// Valid source used for a foreign validator
    FromValidAddress,
    /// Owned validator targeted from an unknown source
    OwnedFromUnknownSource,
}

impl WithdrawalCategory {
    /// Classify a request. `None` when neither the source nor the validator is ours.
    pub const fn of(request: &WithdrawalRequest, valid_source: bool, owned: bool) -> Option<Self> {
        match (valid_source, owned) {
            (true, true) if request.is_full() => Some(Self::Full),
            (true, true) => Some(Self::Partial),
            (true, false) => Some(Self::FromValidAddress),
            (false, true) => Some(Self::OwnedFromUnknownSource),
            (false, false) => None,
        }
    }

    const fn alert(self) -> (AlertBuilder, &'static str) {
        match self {
            Self::Full => (
                AlertBuilder::new("HeadWatcherELFullWithdrawal", Severity::Info),
                "ℹ️ Full withdrawal was requested for our validators",
            ),
            Self::Partial => (
                AlertBuilder::new("HeadWatcherELPartialWithdrawal", Severity::Critical),
                "🚨🚨🚨 Partial withdrawal was requested for our validators 🚨🚨🚨",
            ),
            Self::FromValidAddress => (
                AlertBuilder::new("HeadWatcherELWithdrawalFromUserWithdrawalAddress", Severity::Critical),
                "🚨🚨🚨 Our validator triggered withdrawal was requested from our Withdrawal Vault address",
            ),
            Self::OwnedFromUnknownSource => (
                AlertBuilder::new("HeadWatcherUserELWithdrawal", Severity::Critical),
                "⚠️⚠️⚠️ Our validator triggered withdrawal was requested",
            ),
        }
    }
}

/// Alerts on EL triggered withdrawal requests touching our addresses or validators.
#[derive(Debug, Default)]
pub struct ElWithdrawalHandler {
    sent: SentAlerts,
}

#[async_trait]
impl Handler for ElWithdrawalHandler {
    fn name(&self) -> &'static str {
        "el_withdrawal"
    }

    async fn handle(&mut self, ctx: &WatcherContext, head: &Head) -> Result<()> {
        let requests = head.withdrawal_requests();
        if requests.is_empty() {
            debug!(slot = head.slot(), "No withdrawal requests in block");
            return Ok(());
        }

        let keys = ctx.state.owned_keys().await;
        let categorized = requests.iter().filter_map(|request| {
            let owner = keys.get(&NamedKey::normalize(&request.validator_pubkey));
            let valid_source = ctx.is_valid_withdrawal_address(&request.source_address);
            WithdrawalCategory::of(request, valid_source, owner.is_some()).map(|category| {
                (category, (request, owner.map(|key| key.operator_name.as_str())))
            })
        });

        for (category, requests) in group_by(categorized) {
            info!(slot = head.slot(), ?category, count = requests.len(), "Withdrawal requests");
            let mut description = requests
                .into_iter()
                .map(|(request, operator)| {
                    format!(
                        "\nvalidator_pubkey: {} | operator: {} | source_address: {} | amount: {}",
                        ctx.links.pubkey(&request.validator_pubkey, &keys),
                        operator.unwrap_or("unknown"),
                        request.source_address,
                        request.amount,
                    )
                })
                .collect::<String>();
            description.push_str(&format!("\n\nslot: {}", ctx.links.slot(head.slot())));

            let (builder, summary) = category.alert();
            let labels = match category {
                WithdrawalCategory::Partial => ctx.additional_labels.clone(),
                _ => BTreeMap::new(),
            };
            let alert = builder.build(summary, description, &labels);
            self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alerting::Alert;
    use primitives::ExecutionRequests;

    use super::*;
    use crate::{
        handlers::tests::{FOREIGN, OWNED, VAULT, context},
        state::tests::{empty_body, head_with_body},
    };

    const RANDOM: &str = "0x1111111111111111111111111111111111111111";

    fn withdrawal(source: &str, pubkey: &str, amount: u64) -> WithdrawalRequest {
        WithdrawalRequest { source_address: source.to_owned(), validator_pubkey: pubkey.to_owned(), amount }
    }

    fn head(withdrawals: Vec<WithdrawalRequest>) -> Head {
        let mut body = empty_body();
        body.execution_requests = Some(ExecutionRequests { withdrawals, ..Default::default() });
        head_with_body(100, "0xroot", "0xparent", body)
    }

    async fn alerts_for(withdrawals: Vec<WithdrawalRequest>) -> Vec<Alert> {
        let (ctx, sink) = context().await;
        ElWithdrawalHandler::default().handle(&ctx, &head(withdrawals)).await.unwrap();
        sink.alerts()
    }

    #[tokio::test]
    async fn full_withdrawal_from_vault() {
        let alerts = alerts_for(vec![withdrawal(VAULT, OWNED, 0)]).await;
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].labels.alertname.starts_with("HeadWatcherELFullWithdrawal"));
        assert_eq!(alerts[0].labels.severity, Severity::Info);
    }

    #[tokio::test]
    async fn partial_withdrawal_from_vault() {
        let alerts = alerts_for(vec![withdrawal(VAULT, OWNED, 32)]).await;
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].labels.alertname.starts_with("HeadWatcherELPartialWithdrawal"));
        assert_eq!(alerts[0].labels.severity, Severity::Critical);
        assert_eq!(alerts[0].labels.extra["team"], "validators");
    }

    #[tokio::test]
    async fn vault_used_for_foreign_validator() {
        let alerts = alerts_for(vec![withdrawal(VAULT, FOREIGN, 32), withdrawal(VAULT, "0xff02", 1)]).await;
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert!(alert.labels.alertname.starts_with("HeadWatcherELWithdrawalFromUserWithdrawalAddress"));
        assert_eq!(alert.labels.severity, Severity::Critical);
        assert_eq!(
            alert.annotations.summary,
            "🚨🚨🚨 Our validator triggered withdrawal was requested from our Withdrawal Vault address"
        );
        for needle in [FOREIGN, "0xff02", VAULT, "amount: 32", "slot: [100]"] {
            assert!(alert.annotations.description.contains(needle), "missing {needle}");
        }
    }

    #[tokio::test]
    async fn owned_validator_from_unknown_source() {
        let alerts = alerts_for(vec![withdrawal(RANDOM, OWNED, 32)]).await;
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert!(alert.labels.alertname.starts_with("HeadWatcherUserELWithdrawal"));
        assert_eq!(alert.annotations.summary, "⚠️⚠️⚠️ Our validator triggered withdrawal was requested");
        for needle in [OWNED, "Operator A", RANDOM, "32"] {
            assert!(alert.annotations.description.contains(needle), "missing {needle}");
        }
    }

    #[tokio::test]
    async fn foreign_request_is_ignored() {
        assert!(alerts_for(vec![withdrawal(RANDOM, FOREIGN, 32)]).await.is_empty());
        assert!(alerts_for(vec![]).await.is_empty());
    }

    #[tokio::test]
    async fn categories_do_not_overlap() {
        let alerts = alerts_for(vec![
            withdrawal(VAULT, OWNED, 0),
            withdrawal(VAULT, OWNED, 5),
            withdrawal(VAULT, FOREIGN, 0),
            withdrawal(RANDOM, OWNED, 0),
            withdrawal(RANDOM, FOREIGN, 0),
        ])
        .await;
        let names = alerts
            .iter()
            .map(|alert| alert.labels.alertname.trim_end_matches(char::is_numeric).to_owned())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "HeadWatcherELFullWithdrawal",
                "HeadWatcherELPartialWithdrawal",
                "HeadWatcherELWithdrawalFromUserWithdrawalAddress",
                "HeadWatcherUserELWithdrawal",
            ]
        );
    }
}
