use alloy::primitives::{Address, B256, Bytes};

use crate::WatcherError;

/// Minimal summary of an observed block.
///
/// Created on each successful head fetch, then either retained in the tracked chain segment or
/// discarded if superseded by a reorg. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Block timestamp, seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Notification delivered to block subscribers.
///
/// Within one stream, [`StreamEvent::Reverted`] notifications for a reorg always precede the
/// corresponding [`StreamEvent::Applied`] notifications, so consumers never see two conflicting
/// chains at once.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A block became part of the canonical chain.
    ///
    /// Applied blocks within one batch arrive in strictly ascending number order.
    Applied(BlockSummary),
    /// A previously applied block was removed from the canonical chain.
    ///
    /// Reverts for one reorg arrive in descending number order (newest first).
    Reverted(BlockSummary),
    /// A transport failure exhausted its retries on this tick.
    ///
    /// Non-fatal: the stream stays alive and the next tick tries again.
    TransportFailed(WatcherError),
    /// The stream stopped and the subscription is implicitly closed.
    ///
    /// Emitted exactly once, either for an unrecoverable reorg or when a push head
    /// subscription is lost.
    StreamClosed(WatcherError),
}

impl PartialEq for StreamEvent {
    fn eq(&self, other: &StreamEvent) -> bool {
        match (self, other) {
            (StreamEvent::Applied(a), StreamEvent::Applied(b)) => a == b,
            (StreamEvent::Reverted(a), StreamEvent::Reverted(b)) => a == b,
            (StreamEvent::TransportFailed(a), StreamEvent::TransportFailed(b)) => a == b,
            (StreamEvent::StreamClosed(a), StreamEvent::StreamClosed(b)) => a == b,
            _ => false,
        }
    }
}

/// Address and topic constraints for log queries and event subscriptions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Restrict to logs emitted by this contract, if set.
    pub address: Option<Address>,
    /// Positional topic constraints; `None` matches any topic at that position.
    pub topics: [Option<B256>; 4],
}

impl EventFilter {
    /// Creates an empty filter matching every log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to logs emitted by `address`.
    #[must_use]
    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Constrains the topic at `position` (0..=3). Out-of-range positions are ignored.
    #[must_use]
    pub fn topic(mut self, position: usize, topic: B256) -> Self {
        if let Some(slot) = self.topics.get_mut(position) {
            *slot = Some(topic);
        }
        self
    }

    /// Whether `entry` satisfies the address and topic constraints.
    #[must_use]
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(address) = self.address
            && address != entry.address
        {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, constraint)| match constraint {
            Some(topic) => entry.topics.get(i) == Some(topic),
            None => true,
        })
    }
}

/// Upper bound of a log range request.
///
/// `Latest` is a sentinel resolved against the remote head at request time; the resolved number
/// is never stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockTarget {
    /// A concrete block number.
    Number(u64),
    /// The remote head at the moment the request is issued.
    Latest,
}

impl From<u64> for BlockTarget {
    fn from(number: u64) -> Self {
        BlockTarget::Number(number)
    }
}

/// A range-bounded log query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRangeRequest {
    /// First block of the range, inclusive.
    pub from_block: u64,
    /// Last block of the range, inclusive.
    pub to_block: BlockTarget,
    /// Address/topic constraints applied to the range.
    pub filter: EventFilter,
}

impl LogRangeRequest {
    /// Creates a request covering `[from_block, to_block]` with an empty filter.
    #[must_use]
    pub fn new(from_block: u64, to_block: impl Into<BlockTarget>) -> Self {
        Self { from_block, to_block: to_block.into(), filter: EventFilter::new() }
    }

    /// Replaces the filter.
    #[must_use]
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// A single log entry, normalized at the transport boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Block the log was emitted in.
    pub block_number: u64,
    /// Position of the log within its block.
    pub log_index: u64,
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
}
