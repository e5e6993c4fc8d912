use std::{mem::discriminant, sync::Arc};

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

/// Errors emitted by the watcher.
///
/// `WatcherError` values are returned by builder `connect()`/`build()` methods, by
/// [`LogRangeFetcher::fetch`](crate::LogRangeFetcher::fetch), and are delivered to block
/// subscribers inside [`StreamEvent`](crate::StreamEvent) failure variants.
///
/// [`WatcherError::Transport`] and [`WatcherError::Timeout`] are transient: the transport retries
/// them per its retry policy, and a poll stream that sees one keeps running. An
/// [`WatcherError::UnrecoverableReorg`] is terminal for the affected stream and is never retried
/// automatically.
#[derive(Error, Debug, Clone)]
pub enum WatcherError {
    /// The underlying RPC transport returned an error.
    #[error("transport error: {0}")]
    Transport(Arc<RpcError<TransportErrorKind>>),

    /// A timeout elapsed while waiting for a transport response.
    ///
    /// Treated exactly like any other transport failure: subject to the retry policy, never
    /// interpreted as a reorg signal.
    #[error("transport call timed out")]
    Timeout,

    /// The remote node refused a log query because the block range is too large.
    ///
    /// Handled internally by range bisection; only surfaced when a single-block range is still
    /// rejected, which signals a malformed request or a node limitation.
    #[error("log range [{from}, {to}] rejected by remote node")]
    RangeRejected {
        /// First block of the offending range.
        from: u64,
        /// Last block of the offending range.
        to: u64,
    },

    /// A reorg deeper than the tracked history window was observed.
    ///
    /// The stream that observed it stops after delivering a single terminal
    /// [`StreamEvent::StreamClosed`](crate::StreamEvent::StreamClosed). Recovery requires an
    /// explicit resync from a known-safe block.
    #[error("observed reorg depth {observed_depth} exceeds tracked depth {tracked_depth}")]
    UnrecoverableReorg {
        /// Lower bound on the depth of the observed reorg.
        observed_depth: u64,
        /// Size of the in-memory history window.
        tracked_depth: u64,
    },

    /// A push head subscription ended (for example, the underlying WebSocket closed).
    #[error("head subscription closed")]
    SubscriptionClosed,

    /// A log range request had `from_block` greater than the resolved `to_block`.
    #[error("invalid log range: from {from} is greater than to {to}")]
    InvalidRange {
        /// Requested start block.
        from: u64,
        /// Resolved end block.
        to: u64,
    },

    /// The configured tracked depth is invalid (must be greater than zero).
    #[error("tracked depth must be greater than 0")]
    InvalidTrackedDepth,

    /// The configured poll interval is invalid (must be greater than zero).
    #[error("poll interval must be greater than 0")]
    InvalidPollInterval,

    /// The configured retry attempt count is invalid (must be greater than zero).
    #[error("retry attempts must be greater than 0")]
    InvalidMaxAttempts,
}

impl WatcherError {
    /// Whether a fresh attempt at the failed operation could succeed.
    ///
    /// Used by the transport retry loop: only transient connectivity failures and timeouts are
    /// retried, everything else surfaces immediately.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, WatcherError::Transport(_) | WatcherError::Timeout)
    }

    /// Whether delivering this error ends the stream that produced it.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WatcherError::UnrecoverableReorg { .. } | WatcherError::SubscriptionClosed
        )
    }
}

impl From<RpcError<TransportErrorKind>> for WatcherError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        WatcherError::Transport(Arc::new(error))
    }
}

impl PartialEq for WatcherError {
    fn eq(&self, other: &WatcherError) -> bool {
        match (self, other) {
            (
                WatcherError::RangeRejected { from: a, to: b },
                WatcherError::RangeRejected { from: c, to: d },
            ) => (a, b) == (c, d),
            (
                WatcherError::UnrecoverableReorg { observed_depth: a, tracked_depth: b },
                WatcherError::UnrecoverableReorg { observed_depth: c, tracked_depth: d },
            ) => (a, b) == (c, d),
            (
                WatcherError::InvalidRange { from: a, to: b },
                WatcherError::InvalidRange { from: c, to: d },
            ) => (a, b) == (c, d),
            _ => discriminant(self) == discriminant(other),
        }
    }
}

/// Error type produced by subscriber callbacks.
///
/// Callback failures are isolated: they are reported to the error sink (the `tracing` logs when
/// the feature is enabled) and never interrupt delivery to other subscribers or the producer
/// loop.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;
