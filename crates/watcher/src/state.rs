use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use primitives::{ChainReorgEvent, Head, OwnedKeys, Slot, ValidatorIndex};
use tokio::sync::{Mutex, RwLock};

/// Last 3 epochs of handled heads, enough for reorg checks.
pub const KEEP_MAX_HANDLED_HEADERS_COUNT: usize = 96;

/// State shared by the watcher loop, its refreshers, the reorg listener and the handlers.
///
/// Key and validator maps are swapped wholesale so readers always see a complete map.
#[derive(Debug)]
pub struct WatcherState {
    owned_keys: RwLock<Arc<OwnedKeys>>,
    validators: RwLock<Arc<ValidatorIndex>>,
    chain_reorgs: Mutex<BTreeMap<Slot, ChainReorgEvent>>,
    handled_headers: Mutex<VecDeque<Arc<Head>>>,
    capacity: usize,
}

impl Default for WatcherState {
    fn default() -> Self {
        Self::with_capacity(KEEP_MAX_HANDLED_HEADERS_COUNT)
    }
}

impl WatcherState {
    /// Empty state keeping at most `capacity` handled heads.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            owned_keys: RwLock::default(),
            validators: RwLock::default(),
            chain_reorgs: Mutex::default(),
            handled_headers: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
        }
    }

    /// Current owned keys.
    pub async fn owned_keys(&self) -> Arc<OwnedKeys> {
        Arc::clone(&*self.owned_keys.read().await)
    }

    /// Replace the owned keys.
    pub async fn set_owned_keys(&self, keys: OwnedKeys) {
        *self.owned_keys.write().await = Arc::new(keys);
    }

    /// Current validator index.
    pub async fn validators(&self) -> Arc<ValidatorIndex> {
        Arc::clone(&*self.validators.read().await)
    }

    /// Replace the validator index.
    pub async fn set_validators(&self, validators: ValidatorIndex) {
        *self.validators.write().await = Arc::new(validators);
    }

    /// Queue a reorg event. A later event for the same slot replaces the earlier one.
    pub async fn insert_reorg(&self, event: ChainReorgEvent) {
        self.chain_reorgs.lock().await.insert(event.slot, event);
    }

    /// Take every pending reorg event in ascending slot order.
    pub async fn drain_reorgs(&self) -> Vec<ChainReorgEvent> {
        std::mem::take(&mut *self.chain_reorgs.lock().await).into_values().collect()
    }

    /// Append a handled head, evicting the oldest beyond capacity.
    pub async fn push_handled(&self, head: Arc<Head>) {
        let mut headers = self.handled_headers.lock().await;
        headers.push_back(head);
        while headers.len() > self.capacity {
            headers.pop_front();
        }
    }

    /// Snapshot of the handled heads, oldest first.
    pub async fn handled_headers(&self) -> Vec<Arc<Head>> {
        self.handled_headers.lock().await.iter().cloned().collect()
    }

    /// Slot of the most recently handled head.
    pub async fn last_handled_slot(&self) -> Option<Slot> {
        self.handled_headers.lock().await.back().map(|head| head.slot())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use primitives::{
        BlockHeaderResponse,
        beacon::{
            BlockBody, BlockHeaderMessage, BlockMessage, ExecutionPayload, SignedBlock,
            SignedBlockHeader,
        },
    };

    use super::*;

    /// Head at `slot` with the given roots and body.
    pub(crate) fn head_with_body(slot: Slot, root: &str, parent: &str, body: BlockBody) -> Head {
        let header = BlockHeaderResponse {
            root: root.to_owned(),
            canonical: true,
            header: SignedBlockHeader {
                message: BlockHeaderMessage {
                    slot,
                    proposer_index: 1,
                    parent_root: parent.to_owned(),
                    state_root: "0x00".to_owned(),
                },
            },
        };
        let block = SignedBlock {
            message: BlockMessage { slot, parent_root: parent.to_owned(), body },
        };
        Head::new(header, block)
    }

    pub(crate) fn empty_body() -> BlockBody {
        BlockBody {
            execution_payload: Some(ExecutionPayload { block_number: 1_000 }),
            voluntary_exits: vec![],
            proposer_slashings: vec![],
            attester_slashings: vec![],
            execution_requests: None,
        }
    }

    pub(crate) fn head(slot: Slot, root: &str, parent: &str) -> Head {
        head_with_body(slot, root, parent, empty_body())
    }

    fn reorg(slot: Slot) -> ChainReorgEvent {
        ChainReorgEvent {
            slot,
            depth: 1,
            old_head_block: "0xold".to_owned(),
            new_head_block: "0xnew".to_owned(),
        }
    }

    #[tokio::test]
    async fn handled_window_is_bounded() {
        let state = WatcherState::with_capacity(2);
        for slot in 1..=3 {
            state.push_handled(Arc::new(head(slot, &format!("0x{slot}"), "0x0"))).await;
        }
        let slots = state.handled_headers().await.iter().map(|h| h.slot()).collect::<Vec<_>>();
        assert_eq!(slots, vec![2, 3]);
        assert_eq!(state.last_handled_slot().await, Some(3));
    }

    #[tokio::test]
    async fn reorgs_drain_in_slot_order() {
        let state = WatcherState::default();
        state.insert_reorg(reorg(9)).await;
        state.insert_reorg(reorg(4)).await;
        state.insert_reorg(reorg(9)).await;

        let slots = state.drain_reorgs().await.iter().map(|r| r.slot).collect::<Vec<_>>();
        assert_eq!(slots, vec![4, 9]);
        assert!(state.drain_reorgs().await.is_empty());
    }

    #[tokio::test]
    async fn maps_are_swapped() {
        let state = WatcherState::default();
        let before = state.validators().await;
        state.set_validators(ValidatorIndex::from([(1, "0xaa".to_owned())])).await;
        assert!(before.is_empty());
        assert_eq!(state.validators().await.len(), 1);
    }
}
