use std::{collections::BTreeMap, fmt};

use alerting::{AlertBuilder, SentAlerts, Severity};
use async_trait::async_trait;
use eyre::Result;
use primitives::{Head, ValidatorIdx};
use tracing::{debug, info};

use super::{Handler, Owner, WatcherContext, group_by};

const USER_SLASHING: AlertBuilder = AlertBuilder::new("HeadWatcherUserSlashing", Severity::Critical);
const UNKNOWN_SLASHING: AlertBuilder =
    AlertBuilder::new("HeadWatcherUnknownSlashing", Severity::Critical);
const OTHER_SLASHING: AlertBuilder = AlertBuilder::new("HeadWatcherOtherSlashing", Severity::Info);

/// Violated validator duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duty {
    /// Double proposal
    Proposer,
    /// Double or surround vote
    Attester,
}

impl fmt::Display for Duty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposer => f.write_str("proposer"),
            Self::Attester => f.write_str("attester"),
        }
    }
}

/// A slashed validator found in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slashing {
    /// Validator index
    pub index: ValidatorIdx,
    /// Violated duty
    pub duty: Duty,
    /// Owner of the validator
    pub owner: Owner,
}

/// Alerts on proposer and attester slashings included in the head.
#[derive(Debug, Default)]
pub struct SlashingHandler {
    sent: SentAlerts,
}

impl SlashingHandler {
    /// Slashings of `head`, attesters being the intersection of both attestations.
    pub async fn slashings(ctx: &WatcherContext, head: &Head) -> Vec<Slashing> {
        let validators = ctx.state.validators().await;
        let keys = ctx.state.owned_keys().await;
        let body = head.body();

        let proposers = body
            .proposer_slashings
            .iter()
            .map(|slashing| (slashing.proposer_index(), Duty::Proposer));
        let attesters = body
            .attester_slashings
            .iter()
            .flat_map(|slashing| slashing.slashed_indices())
            .map(|index| (index, Duty::Attester));

        proposers
            .chain(attesters)
            .map(|(index, duty)| Slashing { index, duty, owner: Owner::of(index, &validators, &keys) })
            .collect()
    }

    async fn send_alerts(&mut self, ctx: &WatcherContext, head: &Head, slashings: Vec<Slashing>) -> Result<()> {
        let slot_line = format!("\n\nslot: {}", ctx.links.slot(head.slot()));

        let mut owned = Vec::new();
        let mut unknown = Vec::new();
        let mut other = Vec::new();
        for slashing in slashings {
            match slashing.owner {
                Owner::Owned(key) => owned.push((key.operator_name, (slashing.duty, slashing.index))),
                Owner::Unknown => unknown.push((slashing.duty, slashing.index)),
                Owner::Other => other.push((slashing.duty, slashing.index)),
            }
        }

        if !owned.is_empty() {
            let summary = format!("🚨🚨🚨 {} Our validators were slashed! 🚨🚨🚨", owned.len());
            let mut description = String::new();
            for (operator, duties) in group_by(owned) {
                description.push_str(&format!("\n{operator} -"));
                description.push_str(&describe_duties(ctx, duties));
            }
            description.push_str(&slot_line);
            let alert = USER_SLASHING.build(summary, description, &ctx.additional_labels);
            self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        }
        if !unknown.is_empty() {
            let summary = format!("🚨 {} unknown validators were slashed!", unknown.len());
            let description = describe_duties(ctx, unknown) + &slot_line;
            let alert = UNKNOWN_SLASHING.build(summary, description, &BTreeMap::new());
            self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        }
        if !other.is_empty() {
            let summary = format!("ℹ️ {} other validators were slashed", other.len());
            let description = describe_duties(ctx, other) + &slot_line;
            let alert = OTHER_SLASHING.build(summary, description, &BTreeMap::new());
            self.sent.send_once(ctx.alerts.as_ref(), alert).await?;
        }
        Ok(())
    }
}

fn describe_duties(ctx: &WatcherContext, slashed: Vec<(Duty, ValidatorIdx)>) -> String {
    group_by(slashed)
        .into_iter()
        .map(|(duty, indices)| {
            format!(" Violated duty: {duty} | Validators: {}", ctx.links.validators(&indices))
        })
        .collect()
}

#[async_trait]
impl Handler for SlashingHandler {
    fn name(&self) -> &'static str {
        "slashing"
    }

    async fn handle(&mut self, ctx: &WatcherContext, head: &Head) -> Result<()> {
        let slashings = Self::slashings(ctx, head).await;
        if slashings.is_empty() {
            debug!(slot = head.slot(), "No slashings in block");
            return Ok(());
        }
        info!(slot = head.slot(), count = slashings.len(), "Slashings in block");
        self.send_alerts(ctx, head, slashings).await
    }
}
