use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ValidatorIdx;

/// A validator public key owned by a known node operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedKey {
    /// BLS public key, `0x`-prefixed lowercase hex
    pub key: String,
    /// Human-readable operator name
    pub operator_name: String,
    /// Operator index inside its module
    pub operator_index: u64,
    /// Staking module index
    pub module_index: u64,
}

impl NamedKey {
    /// Normalize a public key for map lookups.
    pub fn normalize(key: &str) -> String {
        key.trim().to_lowercase()
    }
}

/// Owned keys indexed by normalized public key.
pub type OwnedKeys = HashMap<String, NamedKey>;

/// Validator index to public key mapping.
pub type ValidatorIndex = HashMap<ValidatorIdx, String>;
