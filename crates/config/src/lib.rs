//! Head watcher configuration
use std::{collections::BTreeMap, path::PathBuf, str::FromStr, time::Duration};

use alloy_primitives::Address;
use clap::{Parser, ValueEnum};
use url::Url;

/// Upstream endpoints
#[derive(Debug, Clone, Parser)]
pub struct EndpointOpts {
    /// Consensus node base URLs, tried in order
    #[clap(long, env = "CONSENSUS_CLIENT_URI", value_delimiter = ',')]
    pub consensus_client_uri: Vec<Url>,
    /// Execution node JSON-RPC URL
    #[clap(long, env = "EXECUTION_CLIENT_URI")]
    pub execution_client_uri: Option<Url>,
    /// Keys API base URLs, tried in order
    #[clap(long, env = "KEYS_API_URI", value_delimiter = ',')]
    pub keys_api_uri: Vec<Url>,
    /// Alertmanager base URLs, tried in order
    #[clap(long, env = "ALERTMANAGER_URI", value_delimiter = ',')]
    pub alertmanager_uri: Vec<Url>,
}

/// Where owned keys come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeysSourceKind {
    /// Remote keys API
    #[value(name = "keys_api")]
    KeysApi,
    /// Local YAML file
    #[value(name = "file")]
    File,
}

/// Owned keys configuration
#[derive(Debug, Clone, Parser)]
pub struct KeysOpts {
    /// Keys source
    #[clap(long, env = "KEYS_SOURCE", value_enum, default_value = "keys_api")]
    pub keys_source: KeysSourceKind,
    /// YAML key file used by the `file` source
    #[clap(
        long,
        env = "KEYS_FILE_PATH",
        default_value = "./docker/validators/keys.yml"
    )]
    pub keys_file_path: PathBuf,
    /// Lido locator contract
    #[clap(long, env = "LIDO_LOCATOR_ADDRESS")]
    pub lido_locator_address: Option<Address>,
    /// Addresses allowed to submit EL requests for owned validators
    #[clap(long, env = "VALID_WITHDRAWAL_ADDRESSES", value_delimiter = ',')]
    pub valid_withdrawal_addresses: Vec<Address>,
}

/// Alert routing configuration
#[derive(Debug, Clone, Parser)]
pub struct AlertingOpts {
    /// Network name, used for explorer links and the `network` label
    #[clap(long, env = "NETWORK_NAME", default_value = "mainnet")]
    pub network_name: String,
    /// JSON object of labels attached to owned-validator alerts
    #[clap(long, env = "ADDITIONAL_ALERTMANAGER_LABELS", default_value = "{}")]
    pub additional_alertmanager_labels: ExtraLabels,
    /// Log alerts instead of posting them
    #[clap(long, env = "DRY_RUN")]
    pub dry_run: bool,
}

/// Consensus node request policy
#[derive(Debug, Clone, Parser)]
pub struct ConsensusRequestOpts {
    /// Timeout in seconds
    #[clap(
        id = "cl-request-timeout",
        long = "cl-request-timeout",
        env = "CL_REQUEST_TIMEOUT",
        default_value = "180"
    )]
    pub timeout: u64,
    /// Retries per host
    #[clap(
        id = "cl-request-retry-count",
        long = "cl-request-retry-count",
        env = "CL_REQUEST_RETRY_COUNT",
        default_value = "3"
    )]
    pub retry_count: usize,
    /// Backoff factor in seconds
    #[clap(
        id = "cl-request-sleep-before-retry-in-seconds",
        long = "cl-request-sleep-before-retry-in-seconds",
        env = "CL_REQUEST_SLEEP_BEFORE_RETRY_IN_SECONDS",
        default_value = "5"
    )]
    pub sleep_before_retry: f64,
}

/// Keys API request policy
#[derive(Debug, Clone, Parser)]
pub struct KeysApiRequestOpts {
    /// Timeout in seconds
    #[clap(
        id = "keys-api-request-timeout",
        long = "keys-api-request-timeout",
        env = "KEYS_API_REQUEST_TIMEOUT",
        default_value = "180"
    )]
    pub timeout: u64,
    /// Retries per host
    #[clap(
        id = "keys-api-request-retry-count",
        long = "keys-api-request-retry-count",
        env = "KEYS_API_REQUEST_RETRY_COUNT",
        default_value = "3"
    )]
    pub retry_count: usize,
    /// Backoff factor in seconds
    #[clap(
        id = "keys-api-request-sleep-before-retry-in-seconds",
        long = "keys-api-request-sleep-before-retry-in-seconds",
        env = "KEYS_API_REQUEST_SLEEP_BEFORE_RETRY_IN_SECONDS",
        default_value = "5"
    )]
    pub sleep_before_retry: f64,
}

/// Alertmanager request policy
#[derive(Debug, Clone, Parser)]
pub struct AlertmanagerRequestOpts {
    /// Timeout in seconds
    #[clap(
        id = "alertmanager-request-timeout",
        long = "alertmanager-request-timeout",
        env = "ALERTMANAGER_REQUEST_TIMEOUT",
        default_value = "2"
    )]
    pub timeout: u64,
    /// Retries per host
    #[clap(
        id = "alertmanager-request-retry-count",
        long = "alertmanager-request-retry-count",
        env = "ALERTMANAGER_REQUEST_RETRY_COUNT",
        default_value = "2"
    )]
    pub retry_count: usize,
    /// Backoff factor in seconds
    #[clap(
        id = "alertmanager-request-sleep-before-retry-in-seconds",
        long = "alertmanager-request-sleep-before-retry-in-seconds",
        env = "ALERTMANAGER_REQUEST_SLEEP_BEFORE_RETRY_IN_SECONDS",
        default_value = "1"
    )]
    pub sleep_before_retry: f64,
}

/// Timeout and retry tunables of one upstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestTunables {
    /// Request timeout
    pub timeout: Duration,
    /// Retries per host
    pub retry_count: usize,
    /// Backoff factor
    pub backoff: Duration,
}

impl RequestTunables {
    fn new(timeout: u64, retry_count: usize, sleep_before_retry: f64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout),
            retry_count,
            backoff: Duration::from_secs_f64(sleep_before_retry.max(0.0)),
        }
    }
}

impl ConsensusRequestOpts {
    /// Tunables for the consensus provider.
    pub fn tunables(&self) -> RequestTunables {
        RequestTunables::new(self.timeout, self.retry_count, self.sleep_before_retry)
    }
}

impl KeysApiRequestOpts {
    /// Tunables for the keys API provider.
    pub fn tunables(&self) -> RequestTunables {
        RequestTunables::new(self.timeout, self.retry_count, self.sleep_before_retry)
    }
}

impl AlertmanagerRequestOpts {
    /// Tunables for the alertmanager provider.
    pub fn tunables(&self) -> RequestTunables {
        RequestTunables::new(self.timeout, self.retry_count, self.sleep_before_retry)
    }
}

/// Exit request tracking
#[derive(Debug, Clone, Parser)]
pub struct ExitOpts {
    /// Blocks of exit request history kept for expected-exit checks (~7 days)
    #[clap(long, env = "EXIT_REQUESTS_LOOKBACK_BLOCKS", default_value = "50400")]
    pub exit_requests_lookback_blocks: u64,
    /// Block step of ranged event queries
    #[clap(long, env = "EVENTS_SEARCH_STEP", default_value = "10000")]
    pub events_search_step: u64,
    /// Module indices whose owned-validator exits are not alerted
    #[clap(long, env = "DISABLE_UNEXPECTED_EXIT_ALERTS", value_delimiter = ',')]
    pub disable_unexpected_exit_alerts: Vec<u64>,
    /// Execution node request timeout in seconds
    #[clap(long, env = "EL_REQUEST_TIMEOUT", default_value = "5")]
    pub el_request_timeout: u64,
}

/// Metrics and liveness servers
#[derive(Debug, Clone, Parser)]
pub struct ServerOpts {
    /// Prometheus exposition port
    #[clap(long, env = "PROMETHEUS_PORT", default_value = "9000")]
    pub prometheus_port: u16,
    /// Metric name prefix
    #[clap(
        long,
        env = "PROMETHEUS_PREFIX",
        default_value = "ethereum_head_watcher"
    )]
    pub prometheus_prefix: String,
    /// Pulse server port
    #[clap(long, env = "PULSE_SERVER_PORT", default_value = "9010")]
    pub pulse_server_port: u16,
    /// Seconds without a pulse before the daemon reports unhealthy
    #[clap(long, env = "MAX_CYCLE_LIFETIME_IN_SECONDS", default_value = "3000")]
    pub max_cycle_lifetime_in_seconds: u64,
}

/// CLI options for the head watcher
#[derive(Debug, Clone, Parser)]
#[clap(
    name = "head-watcher",
    about = "Watches beacon chain heads and raises validator alerts"
)]
pub struct Opts {
    /// Upstream endpoints
    #[clap(flatten)]
    pub endpoints: EndpointOpts,

    /// Owned keys configuration
    #[clap(flatten)]
    pub keys: KeysOpts,

    /// Alert routing configuration
    #[clap(flatten)]
    pub alerting: AlertingOpts,

    /// Consensus node request policy
    #[clap(flatten)]
    pub consensus_requests: ConsensusRequestOpts,

    /// Keys API request policy
    #[clap(flatten)]
    pub keys_api_requests: KeysApiRequestOpts,

    /// Alertmanager request policy
    #[clap(flatten)]
    pub alertmanager_requests: AlertmanagerRequestOpts,

    /// Exit request tracking
    #[clap(flatten)]
    pub exits: ExitOpts,

    /// Metrics and liveness servers
    #[clap(flatten)]
    pub server: ServerOpts,

    /// Inclusive `start-end` slot range to replay instead of following the head
    #[clap(long, env = "SLOTS_RANGE")]
    pub slots_range: Option<SlotRange>,

    /// Sleep between polling cycles in seconds
    #[clap(long, env = "CYCLE_SLEEP_IN_SECONDS", default_value = "1")]
    pub cycle_sleep_in_seconds: u64,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variables required by the selected mode are unset
    #[error("The following variables are required: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

impl Opts {
    /// Check that every variable the selected mode needs is present.
    ///
    /// All missing variables are reported at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.endpoints.consensus_client_uri.is_empty() {
            missing.push("CONSENSUS_CLIENT_URI");
        }
        if self.keys.keys_source == KeysSourceKind::KeysApi {
            if self.endpoints.keys_api_uri.is_empty() {
                missing.push("KEYS_API_URI");
            }
            if self.endpoints.execution_client_uri.is_none() {
                missing.push("EXECUTION_CLIENT_URI");
            }
            if self.keys.lido_locator_address.is_none() {
                missing.push("LIDO_LOCATOR_ADDRESS");
            }
        }
        if !self.alerting.dry_run && self.endpoints.alertmanager_uri.is_empty() {
            missing.push("ALERTMANAGER_URI");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    /// Sleep between polling cycles.
    pub const fn cycle_sleep(&self) -> Duration {
        Duration::from_secs(self.cycle_sleep_in_seconds)
    }
}

/// Inclusive range of slots to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// First slot
    pub start: u64,
    /// Last slot, inclusive
    pub end: u64,
}

impl SlotRange {
    /// Iterate over the slots of the range.
    pub const fn slots(&self) -> std::ops::RangeInclusive<u64> {
        self.start..=self.end
    }
}

impl FromStr for SlotRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected `start-end`, got `{s}`"))?;
        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid start slot: {e}"))?;
        let end = end
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid end slot: {e}"))?;
        if start > end {
            return Err(format!("start slot {start} is after end slot {end}"));
        }
        Ok(Self { start, end })
    }
}

/// Extra alert labels parsed from a JSON object of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraLabels(pub BTreeMap<String, String>);

impl FromStr for ExtraLabels {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(s)
            .map(Self)
            .map_err(|e| format!("labels must be a JSON object: {e}"))
    }
}
