use thiserror::Error;

/// Failure of a request against a multi-host provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider was built without hosts
    #[error("no hosts provided for {0}")]
    NoHosts(&'static str),
    /// A host answered with a non-success status
    #[error("response from {endpoint} [{status}] with text: \"{text}\" returned")]
    NotOk {
        /// Requested path
        endpoint: String,
        /// HTTP status
        status: u16,
        /// Response body
        text: String,
    },
    /// The response was valid but rejected by the caller
    #[error("forced to use fallback for {endpoint}")]
    ForceUseFallback {
        /// Requested path
        endpoint: String,
    },
    /// Connection, timeout or body read failure
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        /// Requested path
        endpoint: String,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },
    /// The body is not the expected JSON
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        /// Requested path
        endpoint: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
    /// The task decoding a streamed body did not complete
    #[error("decoding {endpoint} was aborted: {source}")]
    Task {
        /// Requested path
        endpoint: String,
        /// Join failure of the blocking task
        #[source]
        source: tokio::task::JoinError,
    },
    /// A host and a path could not be joined
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ProviderError {
    /// HTTP status of a non-success response.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::NotOk { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the upstream reported the resource as missing.
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }
}
