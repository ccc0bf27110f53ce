use std::{
    collections::{BTreeMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use alerting::AlertSink;
use async_trait::async_trait;
use derive_more::Debug as DeriveDebug;
use primitives::{Head, NamedKey, OwnedKeys, ValidatorIdx, ValidatorIndex};

use crate::{Links, WatcherState};

/// Slashings of proposers and attesters
pub mod slashing;
/// Voluntary exits
pub mod exit;
/// Exit requests announced on-chain
pub mod exit_requests;
/// Unhandled reorgs and heads
pub mod fork;
/// EL triggered withdrawals
pub mod el_withdrawal;
/// EL consolidation requests
pub mod consolidation;

pub use consolidation::ConsolidationHandler;
pub use el_withdrawal::ElWithdrawalHandler;
pub use exit::ExitHandler;
pub use exit_requests::ExitRequestsCache;
pub use fork::ForkHandler;
pub use slashing::SlashingHandler;

/// Everything a handler reads besides the head itself.
#[derive(DeriveDebug)]
pub struct WatcherContext {
    /// Shared caches
    pub state: Arc<WatcherState>,
    /// Alert destination
    #[debug(skip)]
    pub alerts: Arc<dyn AlertSink>,
    /// Explorer links
    pub links: Links,
    /// Labels added to alerts about owned validators
    pub additional_labels: BTreeMap<String, String>,
    /// Lowercase withdrawal addresses allowed to act on owned validators
    pub valid_withdrawal_addresses: HashSet<String>,
}

impl WatcherContext {
    /// Whether `address` is a valid withdrawal address.
    pub fn is_valid_withdrawal_address(&self, address: &str) -> bool {
        self.valid_withdrawal_addresses.contains(&address.to_lowercase())
    }
}

/// A classifier run against every new head.
#[async_trait]
pub trait Handler: Send + Sync + Debug {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Inspect `head` and send the alerts it calls for.
    async fn handle(&mut self, ctx: &WatcherContext, head: &Head) -> eyre::Result<()>;
}

/// Who a validator belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// One of the owned keys
    Owned(NamedKey),
    /// Known validator owned by someone else
    Other,
    /// Not in the validator index yet
    Unknown,
}

impl Owner {
    /// Resolve the owner of validator `index`.
    pub fn of(index: ValidatorIdx, validators: &ValidatorIndex, keys: &OwnedKeys) -> Self {
        match validators.get(&index) {
            None => Self::Unknown,
            Some(pubkey) => keys
                .get(&NamedKey::normalize(pubkey))
                .map_or(Self::Other, |owned| Self::Owned(owned.clone())),
        }
    }
}

/// Group `items` by key, keeping keys and items in first-seen order.
pub(crate) fn group_by<K: PartialEq, V>(items: impl IntoIterator<Item = (K, V)>) -> Vec<(K, Vec<V>)> {
    let mut groups: Vec<(K, Vec<V>)> = Vec::new();
    for (key, value) in items {
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }
    groups
}
