//! Prometheus metric set of the head watcher.
#![allow(clippy::uninlined_format_args)]

use std::{path::Path, time::Duration};

use prometheus::{
    Encoder, HistogramVec, IntGauge, IntGaugeVec, Registry, TextEncoder, histogram_opts, opts,
};
use serde::Deserialize;
use tracing::{info, warn};

/// Outcome label of a timed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Task finished without error
    Success,
    /// Task returned an error
    Failure,
}

impl Status {
    /// Label value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Status of a finished task.
    pub const fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() { Self::Success } else { Self::Failure }
    }
}

/// Build metadata exposed through the `build` gauge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildInfo {
    /// Release version
    #[serde(default = "unknown")]
    pub version: String,
    /// Source branch
    #[serde(default = "unknown")]
    pub branch: String,
    /// Source commit
    #[serde(default = "unknown")]
    pub commit: String,
}

fn unknown() -> String {
    "unknown".to_owned()
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self { version: env!("CARGO_PKG_VERSION").to_owned(), branch: unknown(), commit: unknown() }
    }
}

impl BuildInfo {
    /// Load build metadata from a JSON file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "Failed to load build info file");
                Self::default()
            }),
            Err(_) => {
                info!(path = %path.display(), "Build info file not found");
                Self::default()
            }
        }
    }
}

/// Every metric the watcher records, registered in its own prefixed registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,

    /// Consensus node request durations by `endpoint`, `code`, `domain`
    pub cl_requests_duration: HistogramVec,
    /// Keys API request durations by `endpoint`, `code`, `domain`
    pub keys_api_requests_duration: HistogramVec,
    /// Alertmanager request durations by `endpoint`, `code`, `domain`
    pub alertmanager_requests_duration: HistogramVec,
    /// Watcher task durations by `name`, `status`
    pub functions_duration: HistogramVec,

    /// Chain genesis time
    pub genesis_time: IntGauge,
    /// Last handled head slot
    pub slot_number: IntGauge,
    /// Execution block number of the last handled head
    pub block_number: IntGauge,
    /// Head slot at the last keys refresh
    pub keys_source_slot_number: IntGauge,
    /// Slot of the last validator index refresh
    pub validators_index_slot_number: IntGauge,
    /// Block number reported by the keys API status
    pub keys_api_block_number: IntGauge,

    build: IntGaugeVec,
}

impl Metrics {
    /// Create the metric set. Every name is prefixed with `prefix_`.
    pub fn new(prefix: &str) -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(prefix.to_owned()), None)?;
        let request_labels = &["endpoint", "code", "domain"];

        let metrics = Self {
            cl_requests_duration: HistogramVec::new(
                histogram_opts!("cl_requests_duration", "Duration of requests to CL API"),
                request_labels,
            )?,
            keys_api_requests_duration: HistogramVec::new(
                histogram_opts!("keys_api_requests_duration", "Duration of requests to Keys API"),
                request_labels,
            )?,
            alertmanager_requests_duration: HistogramVec::new(
                histogram_opts!(
                    "alertmanager_requests_duration",
                    "Duration of requests to Alertmanager"
                ),
                request_labels,
            )?,
            functions_duration: HistogramVec::new(
                histogram_opts!("functions_duration", "Duration of watcher daemon tasks"),
                &["name", "status"],
            )?,
            genesis_time: IntGauge::new("genesis_time", "Genesis time")?,
            slot_number: IntGauge::new("slot_number", "Watcher head slot number")?,
            block_number: IntGauge::new("block_number", "Watcher head block number")?,
            keys_source_slot_number: IntGauge::new(
                "keys_source_slot_number",
                "Head slot number at the last keys source update",
            )?,
            validators_index_slot_number: IntGauge::new(
                "validators_index_slot_number",
                "Validators index last updated slot number",
            )?,
            keys_api_block_number: IntGauge::new(
                "keys_api_block_number",
                "Keys API block number from status",
            )?,
            build: IntGaugeVec::new(opts!("build", "Build info"), &["version", "branch", "commit"])?,
            registry,
        };
        metrics.register()?;
        Ok(metrics)
    }

    fn register(&self) -> prometheus::Result<()> {
        self.registry.register(Box::new(self.cl_requests_duration.clone()))?;
        self.registry.register(Box::new(self.keys_api_requests_duration.clone()))?;
        self.registry.register(Box::new(self.alertmanager_requests_duration.clone()))?;
        self.registry.register(Box::new(self.functions_duration.clone()))?;
        self.registry.register(Box::new(self.genesis_time.clone()))?;
        self.registry.register(Box::new(self.slot_number.clone()))?;
        self.registry.register(Box::new(self.block_number.clone()))?;
        self.registry.register(Box::new(self.keys_source_slot_number.clone()))?;
        self.registry.register(Box::new(self.validators_index_slot_number.clone()))?;
        self.registry.register(Box::new(self.keys_api_block_number.clone()))?;
        self.registry.register(Box::new(self.build.clone()))?;
        Ok(())
    }

    /// Publish build metadata.
    pub fn set_build_info(&self, info: &BuildInfo) {
        self.build.with_label_values(&[&info.version, &info.branch, &info.commit]).set(1);
    }

    /// Record the duration of a watcher task.
    pub fn observe_task(&self, name: &str, status: Status, elapsed: Duration) {
        self.functions_duration
            .with_label_values(&[name, status.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Render every metric in the text exposition format.
    pub fn gather_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Saturating conversion for gauge values.
pub fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
