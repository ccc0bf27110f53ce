//! Runtime utilities for the head watcher: pulse and metrics servers, shutdown signals.
#![allow(clippy::uninlined_format_args)]

/// Liveness heartbeat and HTTP servers
pub mod pulse;
/// Shutdown signal handling
pub mod shutdown;

pub use pulse::Heartbeat;
