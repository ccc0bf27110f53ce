//! Sources of the owned validator keys.
#![allow(clippy::uninlined_format_args)]

use std::fmt::Debug;

use async_trait::async_trait;
use primitives::OwnedKeys;

mod file;
mod keys_api;

pub use file::FileSource;
pub use keys_api::KeysApiSource;

/// Provider of the owned keys map.
#[async_trait]
pub trait KeySource: Send + Sync + Debug {
    /// Return the complete new map, or `None` when nothing changed since the last call.
    ///
    /// On error the source state is left untouched so the next call retries.
    async fn update_keys(&mut self) -> eyre::Result<Option<OwnedKeys>>;
}
