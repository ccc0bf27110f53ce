//! Head watcher: polls the beacon chain head and runs the event classifiers
//! against every new block.
#![allow(clippy::uninlined_format_args)]

/// Event classifiers
pub mod handlers;
/// Block explorer links used in alert texts
pub mod links;
mod refresh;
mod reorg_listener;
/// Caches shared between the watcher and its background tasks
pub mod state;
/// Head polling loop
pub mod watcher;

pub use handlers::{Handler, Owner, WatcherContext};
pub use links::Links;
pub use state::{KEEP_MAX_HANDLED_HEADERS_COUNT, WatcherState};
pub use watcher::{Watcher, is_missing_slot};
