//! `ChainIO` is a library for interacting with on-chain contracts.
#![allow(clippy::uninlined_format_args)]

use std::{fmt::Debug, time::Duration};

use alloy::{
    providers::{ProviderBuilder, RootProvider, fillers::FillProvider, utils::JoinedRecommendedFillers},
    rpc::client::ClientBuilder,
    transports::http::{Http, reqwest::Client},
};
use async_trait::async_trait;
use url::Url;

/// Lido protocol contracts
pub mod lido;

pub use lido::{ExitBusOracle, LidoLocator};

/// Alias to the default provider with all recommended fillers (read-only).
pub type DefaultProvider = FillProvider<JoinedRecommendedFillers, RootProvider>;

/// Connect a read-only HTTP provider with a per-request timeout.
pub fn connect_http(el_client_url: Url, timeout: Duration) -> eyre::Result<DefaultProvider> {
    let client = Client::builder().timeout(timeout).build()?;
    let transport = Http::with_client(client, el_client_url);
    let is_local = transport.guess_local();
    let rpc = ClientBuilder::default().transport(transport, is_local);
    Ok(ProviderBuilder::new().connect_client(rpc))
}

/// An exit request emitted by the exit bus oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitRequest {
    /// Block the request was included in
    pub block_number: u64,
    /// Staking module id
    pub module_id: u64,
    /// Node operator index inside the module
    pub operator_id: u64,
    /// Validator requested to exit
    pub validator_index: u64,
}

/// Source of on-chain validator exit requests.
#[async_trait]
pub trait ExitRequestOracle: Send + Sync + Debug {
    /// Monotonic counter of processed exit requests at `block`.
    async fn total_requests_processed(&self, block: u64) -> eyre::Result<u64>;

    /// Exit requests emitted in the closed block range `[from, to]`.
    async fn exit_requests(&self, from: u64, to: u64) -> eyre::Result<Vec<ExitRequest>>;
}
