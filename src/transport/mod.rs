//! The narrow seam between the streaming engine and the RPC layer.
//!
//! Everything chain-watcher knows about the remote node goes through the [`Transport`] trait:
//! fetch the head, fetch a block by hash for ancestry walks, fetch logs for a range, and
//! optionally subscribe to pushed heads. [`RpcTransport`] is the production implementation over
//! an alloy provider; tests substitute a scripted mock.

mod rpc;

use std::pin::Pin;

use alloy::{
    primitives::B256,
    transports::{RpcError, TransportErrorKind},
};
use tokio_stream::Stream;

use crate::{BlockSummary, EventFilter, LogEntry, WatcherError};

pub use rpc::{
    DEFAULT_CALL_TIMEOUT, RetryPolicy, RpcTransport, RpcTransportBuilder,
};

/// Stream of pushed head notifications from a pubsub-capable transport.
pub type HeadStream = Pin<Box<dyn Stream<Item = Result<BlockSummary, WatcherError>> + Send>>;

/// Remote-node operations consumed by the streaming engine.
///
/// Implementations own their connection state and retry policy; a single transport may be shared
/// read-only across multiple concurrent streams. Every call is expected to be bounded by the
/// implementation's own timeout and to surface [`WatcherError::Timeout`] on expiry.
pub trait Transport: Send + Sync + 'static {
    /// Fetches the current head of the remote chain.
    fn fetch_head(&self) -> impl Future<Output = Result<BlockSummary, WatcherError>> + Send;

    /// Fetches a block by hash.
    ///
    /// Used by the ancestry walk when a reorg is first detected. A hash unknown to the remote
    /// node is a transport-level failure, not a reorg signal.
    fn fetch_block(&self, hash: B256)
    -> impl Future<Output = Result<BlockSummary, WatcherError>> + Send;

    /// Fetches logs for the inclusive range `[from, to]` matching `filter`.
    ///
    /// Fails with [`WatcherError::RangeRejected`] when the remote node refuses the range as too
    /// large; the caller handles bisection.
    fn fetch_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> impl Future<Output = Result<Vec<LogEntry>, WatcherError>> + Send;

    /// Subscribes to pushed head notifications.
    ///
    /// The default implementation reports pubsub as unavailable; poll-only transports can leave
    /// it untouched.
    fn subscribe_heads(&self) -> impl Future<Output = Result<HeadStream, WatcherError>> + Send {
        async {
            Err(WatcherError::from(RpcError::Transport(TransportErrorKind::PubsubUnavailable)))
        }
    }
}
