//! HTTP plumbing of the head watcher: multi-host fallback provider, beacon node
//! and keys API clients, server-sent events decoding.
#![allow(clippy::uninlined_format_args)]

mod error;
/// Multi-host HTTP provider with per-host retries
pub mod http_provider;
/// Beacon node API client
pub mod consensus;
/// Keys API client
pub mod keys_api;
/// Server-sent events decoding
pub mod sse;

pub use consensus::ConsensusClient;
pub use error::ProviderError;
pub use http_provider::{HttpProvider, RequestOptions, RequestPolicy};
pub use keys_api::KeysApiClient;
