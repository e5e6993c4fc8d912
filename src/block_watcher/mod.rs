//! Head streaming, reorg publication, and subscription fan-out.

mod builder;
mod registry;
mod watcher;

pub use builder::{BlockWatcherBuilder, DEFAULT_POLL_INTERVAL, DEFAULT_TRACKED_DEPTH, StreamMode};
pub use registry::SubscriptionId;
pub use watcher::{BlockWatcher, StreamHandle};
