use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use keys_source::KeySource;
use metrics::{Metrics, Status, gauge_value};
use network::ConsensusClient;
use primitives::{BlockId, SLOTS_PER_EPOCH, Slot, ValidatorEntry, ValidatorIndex, slot_at};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::WatcherState;

/// Current UNIX time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
}

/// Replace the owned keys if the source reports a change.
pub(crate) async fn refresh_keys(
    source: Arc<Mutex<Box<dyn KeySource>>>,
    state: Arc<WatcherState>,
    metrics: Arc<Metrics>,
    slot: Slot,
) {
    let started = Instant::now();
    let result = source.lock().await.update_keys().await;
    metrics.observe_task("update_user_keys", Status::of(&result), started.elapsed());

    match result {
        Ok(Some(keys)) => {
            warn!(count = keys.len(), "Owned keys updated");
            state.set_owned_keys(keys).await;
        }
        Ok(None) => {}
        Err(err) => {
            error!(%err, "Can not update owned keys");
            return;
        }
    }
    metrics.keys_source_slot_number.set(gauge_value(slot));
}

/// Merge fetched entries into `known`, keeping already indexed validators as they are.
pub(crate) fn merge_validators(known: &ValidatorIndex, entries: Vec<ValidatorEntry>) -> ValidatorIndex {
    let mut merged = known.clone();
    for entry in entries {
        merged.entry(entry.index).or_insert(entry.validator.pubkey);
    }
    merged
}

/// Refresh the validator index at the first run and at epoch boundaries.
///
/// The registry only grows at epoch boundaries, so other slots are skipped.
pub(crate) async fn refresh_validators(
    consensus: ConsensusClient,
    state: Arc<WatcherState>,
    metrics: Arc<Metrics>,
    genesis_time: u64,
) {
    let slot = slot_at(genesis_time, unix_now());
    let known = state.validators().await;
    if !known.is_empty() && slot % SLOTS_PER_EPOCH != 0 {
        return;
    }

    info!(slot, "Updating indexed validators keys");
    let started = Instant::now();
    let result = consensus.get_validators(&BlockId::Head).await;
    metrics.observe_task("update_validators", Status::of(&result), started.elapsed());

    let entries = match result {
        Ok(entries) => entries,
        Err(err) => {
            error!(%err, "Error while getting validators");
            return;
        }
    };
    let merged = merge_validators(&known, entries);
    info!(count = merged.len(), "Indexed validators keys updated");
    state.set_validators(merged).await;
    metrics.validators_index_slot_number.set(gauge_value(slot));
}

#[cfg(test)]
mod tests {
    use primitives::beacon::ValidatorRecord;

    use super::*;

    fn entry(index: u64, pubkey: &str) -> ValidatorEntry {
        ValidatorEntry { index, validator: ValidatorRecord { pubkey: pubkey.to_owned() } }
    }

    #[test]
    fn merge_never_overwrites_known_indices() {
        let known = ValidatorIndex::from([(1, "0xaa".to_owned())]);
        let merged = merge_validators(&known, vec![entry(1, "0xbb"), entry(2, "0xcc")]);
        assert_eq!(merged[&1], "0xaa");
        assert_eq!(merged[&2], "0xcc");
    }
}
