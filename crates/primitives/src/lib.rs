//! Core primitives for the head watcher: beacon data model, owned keys and retry helpers.
#![allow(clippy::uninlined_format_args)]

/// Beacon API data model
pub mod beacon;
/// Owned validator keys
pub mod keys;
/// Retry helpers with exponential backoff
pub mod retries;
/// Serde helpers for integers that the beacon API encodes as strings
pub mod string_or_native;

pub use beacon::{
    AttesterSlashing, BlockBody, BlockHeaderResponse, BlockId, ChainReorgEvent,
    ConsolidationRequest, ExecutionRequests, Genesis, Head, IndexedAttestation, ProposerSlashing,
    SignedVoluntaryExit, ValidatorEntry, WithdrawalRequest,
};
pub use keys::{NamedKey, OwnedKeys, ValidatorIndex};

/// Slot number.
pub type Slot = u64;
/// Validator index in the beacon state registry.
pub type ValidatorIdx = u64;
/// Execution-layer block number.
pub type BlockNumber = u64;

/// Duration of a single slot in seconds.
pub const SECONDS_PER_SLOT: u64 = 12;
/// An EPOCH is a series of 32 slots.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Compute the slot number for `now` given the chain genesis time, both as UNIX seconds.
pub const fn slot_at(genesis_time: u64, now: u64) -> Slot {
    now.saturating_sub(genesis_time) / SECONDS_PER_SLOT
}

/// Start time of `slot` as UNIX seconds.
pub const fn slot_start_time(genesis_time: u64, slot: Slot) -> u64 {
    genesis_time + slot * SECONDS_PER_SLOT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_at_rounds_down_within_slot() {
        assert_eq!(slot_at(1_000, 1_000), 0);
        assert_eq!(slot_at(1_000, 1_011), 0);
        assert_eq!(slot_at(1_000, 1_012), 1);
        assert_eq!(slot_at(1_000, 1_000 + 32 * 12), SLOTS_PER_EPOCH);
    }

    #[test]
    fn slot_at_before_genesis_is_zero() {
        assert_eq!(slot_at(1_000, 10), 0);
    }

    #[test]
    fn slot_start_time_inverts_slot_at() {
        assert_eq!(slot_at(1_606_824_023, slot_start_time(1_606_824_023, 6_213_852)), 6_213_852);
    }
}
