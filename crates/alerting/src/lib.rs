//! Alert model, Alertmanager client and sent-alert deduplication.
#![allow(clippy::uninlined_format_args)]

/// Alert wire model and builder
pub mod alert;
/// Alert sinks
pub mod client;
/// Bounded history of sent alerts
pub mod history;

pub use alert::{Alert, AlertBuilder, Annotations, Labels, Severity};
pub use client::{AlertSink, AlertmanagerClient, MemorySink};
pub use history::{KEEP_MAX_SENT_ALERTS, SentAlerts};
