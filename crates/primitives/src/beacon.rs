//! Beacon node API types, limited to the fields the watcher consumes.
//!
//! Spec: <https://ethereum.github.io/beacon-APIs/>
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{BlockNumber, Slot, ValidatorIdx, string_or_native};

/// Block identifier accepted by the `headers` and `blocks` endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockId {
    /// Canonical head in the node's view.
    Head,
    /// Latest finalized block.
    Finalized,
    /// Genesis block.
    Genesis,
    /// Block at a specific slot.
    Slot(Slot),
    /// Block by its `0x`-prefixed root.
    Root(String),
}

impl BlockId {
    /// Whether this identifier refers to the moving chain head.
    pub const fn is_head(&self) -> bool {
        matches!(self, Self::Head)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => f.write_str("head"),
            Self::Finalized => f.write_str("finalized"),
            Self::Genesis => f.write_str("genesis"),
            Self::Slot(slot) => write!(f, "{slot}"),
            Self::Root(root) => f.write_str(root),
        }
    }
}

/// `GET /eth/v1/beacon/genesis`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Genesis time in UNIX seconds
    #[serde(with = "string_or_native")]
    pub genesis_time: u64,
    /// Genesis validators root
    pub genesis_validators_root: String,
}

/// Message of a beacon block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderMessage {
    /// Slot
    #[serde(with = "string_or_native")]
    pub slot: Slot,
    /// Proposer index
    #[serde(with = "string_or_native")]
    pub proposer_index: ValidatorIdx,
    /// Parent block root
    pub parent_root: String,
    /// State root
    pub state_root: String,
}

/// Signed beacon block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlockHeader {
    /// Header message
    pub message: BlockHeaderMessage,
}

/// `GET /eth/v1/beacon/headers/{block_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderResponse {
    /// Block root
    pub root: String,
    /// Whether the block is canonical
    pub canonical: bool,
    /// Signed header
    pub header: SignedBlockHeader,
}

impl BlockHeaderResponse {
    /// Slot of the header.
    pub const fn slot(&self) -> Slot {
        self.header.message.slot
    }
}

/// Execution payload fields of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    /// Execution block number
    #[serde(with = "string_or_native")]
    pub block_number: BlockNumber,
}

/// Voluntary exit message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoluntaryExit {
    /// Exiting validator
    #[serde(with = "string_or_native")]
    pub validator_index: ValidatorIdx,
}

/// Signed voluntary exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVoluntaryExit {
    /// Exit message
    pub message: VoluntaryExit,
}

/// Proposer slashing, proven by two conflicting signed headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposerSlashing {
    /// First conflicting header
    pub signed_header_1: SignedBlockHeader,
    /// Second conflicting header
    pub signed_header_2: SignedBlockHeader,
}

impl ProposerSlashing {
    /// Index of the slashed proposer.
    pub const fn proposer_index(&self) -> ValidatorIdx {
        self.signed_header_1.message.proposer_index
    }
}

/// Attestation reduced to its attesting indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedAttestation {
    /// Validators that signed the attestation
    #[serde(with = "string_or_native::sequence")]
    pub attesting_indices: Vec<ValidatorIdx>,
}

/// Attester slashing, proven by two conflicting attestations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttesterSlashing {
    /// First attestation
    pub attestation_1: IndexedAttestation,
    /// Second attestation
    pub attestation_2: IndexedAttestation,
}

impl AttesterSlashing {
    /// Validators that signed both attestations, in ascending order.
    ///
    /// Only these are provably slashable; an index present in just one of the
    /// attestations is not.
    pub fn slashed_indices(&self) -> Vec<ValidatorIdx> {
        let second: std::collections::HashSet<_> =
            self.attestation_2.attesting_indices.iter().copied().collect();
        let mut both: Vec<_> = self
            .attestation_1
            .attesting_indices
            .iter()
            .copied()
            .filter(|index| second.contains(index))
            .collect();
        both.sort_unstable();
        both.dedup();
        both
    }
}

/// EL-triggered withdrawal request (EIP-7002).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Address that submitted the request
    pub source_address: String,
    /// Target validator public key
    pub validator_pubkey: String,
    /// Requested amount in Gwei, zero for a full exit
    #[serde(with = "string_or_native")]
    pub amount: u64,
}

impl WithdrawalRequest {
    /// A zero amount requests a full withdrawal, i.e. an exit.
    pub const fn is_full(&self) -> bool {
        self.amount == 0
    }
}

/// EL-triggered consolidation request (EIP-7251).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationRequest {
    /// Address that submitted the request
    pub source_address: String,
    /// Validator whose stake is moved
    pub source_pubkey: String,
    /// Validator receiving the stake
    pub target_pubkey: String,
}

/// Deposit request (EIP-6110).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Validator public key
    pub pubkey: String,
    /// Withdrawal credentials
    pub withdrawal_credentials: String,
    /// Amount in Gwei
    #[serde(with = "string_or_native")]
    pub amount: u64,
}

/// Execution-layer requests carried by Electra blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequests {
    /// Deposits
    #[serde(default)]
    pub deposits: Vec<DepositRequest>,
    /// Withdrawal requests
    #[serde(default)]
    pub withdrawals: Vec<WithdrawalRequest>,
    /// Consolidation requests
    #[serde(default)]
    pub consolidations: Vec<ConsolidationRequest>,
}

/// Beacon block body fields of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Execution payload, absent before Bellatrix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_payload: Option<ExecutionPayload>,
    /// Voluntary exits
    #[serde(default)]
    pub voluntary_exits: Vec<SignedVoluntaryExit>,
    /// Proposer slashings
    #[serde(default)]
    pub proposer_slashings: Vec<ProposerSlashing>,
    /// Attester slashings
    #[serde(default)]
    pub attester_slashings: Vec<AttesterSlashing>,
    /// EL requests, absent before Electra
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_requests: Option<ExecutionRequests>,
}

/// Beacon block message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    /// Slot
    #[serde(with = "string_or_native")]
    pub slot: Slot,
    /// Parent block root
    pub parent_root: String,
    /// Body
    pub body: BlockBody,
}

/// `GET /eth/v2/beacon/blocks/{block_id}` data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    /// Block message
    pub message: BlockMessage,
}

/// A chain head: header and full block body fetched for the same root.
///
/// Immutable once built; it lives in the handled-headers window after processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    /// Header response
    pub header: BlockHeaderResponse,
    /// Block message
    pub block: BlockMessage,
}

impl Head {
    /// Build a head from the header and the block body fetched by its root.
    pub fn new(header: BlockHeaderResponse, block: SignedBlock) -> Self {
        Self { header, block: block.message }
    }

    /// Slot of the head.
    pub const fn slot(&self) -> Slot {
        self.header.header.message.slot
    }

    /// Block root.
    pub fn root(&self) -> &str {
        &self.header.root
    }

    /// Parent block root.
    pub fn parent_root(&self) -> &str {
        &self.header.header.message.parent_root
    }

    /// Execution block number, `None` for blocks without an execution payload.
    pub fn block_number(&self) -> Option<BlockNumber> {
        self.block.body.execution_payload.as_ref().map(|payload| payload.block_number)
    }

    /// Block body.
    pub const fn body(&self) -> &BlockBody {
        &self.block.body
    }

    /// EL withdrawal requests, empty before Electra.
    pub fn withdrawal_requests(&self) -> &[WithdrawalRequest] {
        self.block.body.execution_requests.as_ref().map_or(&[], |r| r.withdrawals.as_slice())
    }

    /// EL consolidation requests, empty before Electra.
    pub fn consolidation_requests(&self) -> &[ConsolidationRequest] {
        self.block.body.execution_requests.as_ref().map_or(&[], |r| r.consolidations.as_slice())
    }
}

/// `chain_reorg` SSE event.
///
/// Spec: <https://ethereum.github.io/beacon-APIs/#/Events/eventstream>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReorgEvent {
    /// Slot of the new head
    #[serde(with = "string_or_native")]
    pub slot: Slot,
    /// Number of slots reorganized
    #[serde(with = "string_or_native")]
    pub depth: u64,
    /// Root of the old head block
    pub old_head_block: String,
    /// Root of the new head block
    pub new_head_block: String,
}

impl ChainReorgEvent {
    /// Slots affected by the reorg, inclusive.
    pub const fn affected_slots(&self) -> core::ops::RangeInclusive<Slot> {
        self.slot.saturating_sub(self.depth)..=self.slot
    }
}

/// Public key of a validator registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    /// BLS public key
    pub pubkey: String,
}

/// Entry of `GET /eth/v1/beacon/states/{state_id}/validators`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    /// Validator index
    #[serde(with = "string_or_native")]
    pub index: ValidatorIdx,
    /// Registry record
    pub validator: ValidatorRecord,
}
