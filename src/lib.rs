//! chain-watcher is a library for streaming chain-consistent block and event data from an EVM
//! node.
//!
//! The main entry point is [`BlockWatcher`], built via [`BlockWatcherBuilder`] over any
//! [`Transport`] (usually [`RpcTransport`] wrapping an alloy provider).
//!
//! After constructing a watcher, register subscriptions with [`BlockWatcher::watch_blocks`] or
//! [`BlockWatcher::watch_events`], then call [`BlockWatcher::start`] to spawn the producer loop.
//!
//! # Ordering
//!
//! Every subscriber sees the same [`StreamEvent`] sequence in the same order. On a reorg, the
//! reverted blocks are published newest first, before any replacement block applies, so a
//! consumer that processes events in order never holds state from two conflicting chains at once.
//!
//! # Reorg handling
//!
//! The watcher keeps a bounded window of recent block hashes ([`ChainHistoryTracker`]) and
//! reconciles every observed head against it. Reorgs no deeper than the tracked window are
//! reported as [`StreamEvent::Reverted`] / [`StreamEvent::Applied`] pairs; a reorg that reaches
//! below the window is unrecoverable and closes the stream with
//! [`WatcherError::UnrecoverableReorg`].
//!
//! # Log queries
//!
//! [`BlockWatcher::get_logs`] (and the standalone [`LogRangeFetcher`]) issue ordered log range
//! queries, transparently bisecting ranges the remote node rejects as too large.

#[macro_use]
mod logging;

pub mod block_watcher;
pub mod chain_tracker;
pub mod log_fetcher;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

mod error;
mod types;

pub use block_watcher::{
    BlockWatcher, BlockWatcherBuilder, DEFAULT_POLL_INTERVAL, DEFAULT_TRACKED_DEPTH, StreamHandle,
    StreamMode, SubscriptionId,
};
pub use chain_tracker::{ChainHistoryTracker, ReorgOutcome};
pub use error::{CallbackError, WatcherError};
pub use log_fetcher::LogRangeFetcher;
pub use transport::{
    DEFAULT_CALL_TIMEOUT, HeadStream, RetryPolicy, RpcTransport, RpcTransportBuilder, Transport,
};
pub use types::{
    BlockSummary, BlockTarget, EventFilter, LogEntry, LogRangeRequest, StreamEvent,
};
