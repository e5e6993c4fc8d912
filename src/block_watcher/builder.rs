use std::{sync::Arc, time::Duration};

use crate::{
    WatcherError,
    block_watcher::{BlockWatcher, registry::SubscriptionRegistry},
    transport::Transport,
};

/// Default size of the reorg-tracking history window.
pub const DEFAULT_TRACKED_DEPTH: usize = 64;

/// Default head-polling interval when no push transport is used.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// How the producer loop learns about new heads.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StreamMode {
    /// Fetch the head on a fixed interval.
    #[default]
    Poll,
    /// Consume pushed head notifications from [`Transport::subscribe_heads`].
    Push,
}

/// Builder/configuration for [`BlockWatcher`].
#[derive(Clone, Debug)]
pub struct BlockWatcherBuilder {
    /// Maximum reorg depth reconcilable from in-memory history.
    pub tracked_depth: usize,
    /// Head-polling interval, used in [`StreamMode::Poll`].
    pub poll_interval: Duration,
    /// How many ancestors to fetch when walking back a detected reorg before declaring it
    /// unrecoverable. Defaults to `tracked_depth + 1`.
    pub max_walk_back: Option<usize>,
    /// Poll or push.
    pub mode: StreamMode,
}

impl Default for BlockWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockWatcherBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracked_depth: DEFAULT_TRACKED_DEPTH,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_walk_back: None,
            mode: StreamMode::Poll,
        }
    }

    /// Sets the history window size. Reorgs deeper than this are unrecoverable.
    ///
    /// Must be greater than 0.
    #[must_use]
    pub fn tracked_depth(mut self, tracked_depth: usize) -> Self {
        self.tracked_depth = tracked_depth;
        self
    }

    /// Sets the polling interval. Ignored in push mode.
    ///
    /// Must be greater than zero.
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Bounds the ancestry walk performed when a reorg is first detected.
    #[must_use]
    pub fn max_walk_back(mut self, max_walk_back: usize) -> Self {
        self.max_walk_back = Some(max_walk_back);
        self
    }

    /// Consumes pushed head notifications instead of polling.
    #[must_use]
    pub fn push(mut self) -> Self {
        self.mode = StreamMode::Push;
        self
    }

    /// Validates the configuration and attaches the transport.
    ///
    /// # Errors
    ///
    /// * [`WatcherError::InvalidTrackedDepth`] - if `tracked_depth` is 0.
    /// * [`WatcherError::InvalidPollInterval`] - if `poll_interval` is zero in poll mode.
    pub fn connect<T: Transport>(self, transport: T) -> Result<BlockWatcher<T>, WatcherError> {
        if self.tracked_depth == 0 {
            return Err(WatcherError::InvalidTrackedDepth);
        }
        if self.mode == StreamMode::Poll && self.poll_interval.is_zero() {
            return Err(WatcherError::InvalidPollInterval);
        }
        Ok(BlockWatcher {
            transport: Arc::new(transport),
            registry: Arc::new(SubscriptionRegistry::new()),
            tracked_depth: self.tracked_depth,
            poll_interval: self.poll_interval,
            max_walk_back: self.max_walk_back.unwrap_or(self.tracked_depth + 1),
            mode: self.mode,
        })
    }
}
