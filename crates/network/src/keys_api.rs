use prometheus::HistogramVec;
use reqwest::Url;
use serde::Deserialize;

use crate::{
    ProviderError,
    http_provider::{HttpProvider, RequestOptions, RequestPolicy},
};

const STATUS: &str = "v1/status";
const MODULES: &str = "v1/modules";
const OPERATORS: &str = "v1/operators";
const KEYS: &str = "v1/keys";

/// Execution layer block the keys API data was read at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElBlockSnapshot {
    /// Block number
    pub block_number: u64,
    /// Block hash
    pub block_hash: String,
    /// Block timestamp
    pub timestamp: u64,
}

/// `GET /v1/status`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysApiStatus {
    /// Service version
    pub app_version: String,
    /// Chain id
    pub chain_id: u64,
    /// Snapshot the served data belongs to
    pub el_block_snapshot: ElBlockSnapshot,
}

/// Staking module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingModule {
    /// Module id
    pub id: u64,
    /// Module contract address
    pub staking_module_address: String,
    /// Keys operations counter of the module
    pub nonce: u64,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
}

/// Node operator of a module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Operator {
    /// Operator index inside the module
    pub index: u64,
    /// Operator name
    pub name: String,
}

/// Operators grouped by module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleOperators {
    /// Module
    pub module: StakingModule,
    /// Its operators
    pub operators: Vec<Operator>,
}

/// Validator key registered in a module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredKey {
    /// Public key
    pub key: String,
    /// Owning operator index
    pub operator_index: u64,
    /// Module contract address
    pub module_address: String,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

/// Keys API client.
///
/// Docs: <https://keys-api.lido.fi/api/static/index.html>
#[derive(Debug, Clone)]
pub struct KeysApiClient {
    provider: HttpProvider,
}

impl KeysApiClient {
    /// Create a client over `hosts`, tried in order.
    pub fn new(
        hosts: Vec<Url>,
        policy: RequestPolicy,
        metrics: Option<HistogramVec>,
    ) -> Result<Self, ProviderError> {
        Ok(Self { provider: HttpProvider::new("KeysApiClient", hosts, policy, metrics)? })
    }

    /// `GET /v1/status`
    pub async fn get_status(&self) -> Result<KeysApiStatus, ProviderError> {
        self.provider.get_json(STATUS, STATUS, RequestOptions::default()).await
    }

    /// `GET /v1/modules`
    pub async fn get_modules(&self) -> Result<Vec<StakingModule>, ProviderError> {
        let response: DataResponse<_> =
            self.provider.get_json(MODULES, MODULES, RequestOptions::default()).await?;
        Ok(response.data)
    }

    /// `GET /v1/operators`
    pub async fn get_operators(&self) -> Result<Vec<ModuleOperators>, ProviderError> {
        let response: DataResponse<_> =
            self.provider.get_json(OPERATORS, OPERATORS, RequestOptions::default()).await?;
        Ok(response.data)
    }

    /// `GET /v1/keys?used=true`
    pub async fn get_used_keys(&self) -> Result<Vec<RegisteredKey>, ProviderError> {
        let options = RequestOptions { query: &[("used", "true")], ..Default::default() };
        let response: DataResponse<_> = self.provider.get_json(KEYS, KEYS, options).await?;
        Ok(response.data)
    }
}
