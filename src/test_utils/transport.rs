use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy::{
    primitives::{Address, B256, Bytes},
    transports::RpcError,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    BlockSummary, EventFilter, LogEntry, WatcherError,
    test_utils::canonical_block,
    transport::{HeadStream, Transport},
};

/// Scriptable in-memory [`Transport`].
///
/// Heads are served from a queue; once the script is exhausted the last head repeats, modeling a
/// quiet chain between polls. Blocks registered via [`insert_block`](Self::insert_block) (or any
/// scripted head) are resolvable by hash for ancestry walks. Log queries serve a flat log store,
/// optionally rejecting ranges wider than a configured span to exercise bisection.
pub struct MockTransport {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    heads: VecDeque<Result<BlockSummary, WatcherError>>,
    last_head: Option<BlockSummary>,
    blocks: HashMap<B256, BlockSummary>,
    logs: Vec<LogEntry>,
    max_log_span: Option<u64>,
    reject_all_logs: bool,
    log_calls: Vec<(u64, u64)>,
    head_calls: usize,
    push_tx: Option<mpsc::UnboundedSender<Result<BlockSummary, WatcherError>>>,
    push_rx: Option<mpsc::UnboundedReceiver<Result<BlockSummary, WatcherError>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let state = MockState {
            push_tx: Some(push_tx),
            push_rx: Some(push_rx),
            ..MockState::default()
        };
        Self { state: Mutex::new(state) }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn missing() -> WatcherError {
        WatcherError::Transport(Arc::new(RpcError::NullResp))
    }

    /// Registers a linear canonical chain and returns it. Does not enqueue heads.
    pub fn seed_chain(&self, numbers: std::ops::RangeInclusive<u64>) -> Vec<BlockSummary> {
        let chain: Vec<BlockSummary> = numbers.map(canonical_block).collect();
        let mut state = self.lock();
        for block in &chain {
            state.blocks.insert(block.hash, block.clone());
        }
        state.last_head = chain.last().cloned();
        chain
    }

    /// Makes `block` resolvable by hash.
    pub fn insert_block(&self, block: BlockSummary) {
        self.lock().blocks.insert(block.hash, block.clone());
    }

    /// Registers a whole branch (see [`test_block`]) and makes each block fetchable.
    pub fn insert_branch(&self, blocks: &[BlockSummary]) {
        let mut state = self.lock();
        for block in blocks {
            state.blocks.insert(block.hash, block.clone());
        }
    }

    /// Enqueues a head for the next poll; also registers it by hash.
    pub fn push_head(&self, block: BlockSummary) {
        let mut state = self.lock();
        state.blocks.insert(block.hash, block.clone());
        state.heads.push_back(Ok(block));
    }

    /// Enqueues a head fetch failure for the next poll.
    pub fn fail_next_head(&self, error: WatcherError) {
        self.lock().heads.push_back(Err(error));
    }

    /// Sends a head through the push subscription; also registers it by hash.
    pub fn send_push_head(&self, block: BlockSummary) {
        let mut state = self.lock();
        state.blocks.insert(block.hash, block.clone());
        if let Some(tx) = &state.push_tx {
            _ = tx.send(Ok(block));
        }
    }

    /// Sends an error through the push subscription.
    pub fn send_push_error(&self, error: WatcherError) {
        if let Some(tx) = &self.lock().push_tx {
            _ = tx.send(Err(error));
        }
    }

    /// Closes the push subscription stream.
    pub fn close_push(&self) {
        self.lock().push_tx = None;
    }

    /// Adds a minimal log entry at `(block_number, log_index)`.
    pub fn add_log(&self, block_number: u64, log_index: u64) {
        self.add_log_entry(LogEntry {
            block_number,
            log_index,
            address: Address::ZERO,
            topics: Vec::new(),
            data: Bytes::new(),
        });
    }

    /// Adds a fully specified log entry.
    pub fn add_log_entry(&self, entry: LogEntry) {
        self.lock().logs.push(entry);
    }

    /// Rejects log queries spanning more than `span` blocks, measured as `to - from`.
    pub fn set_max_log_span(&self, span: u64) {
        self.lock().max_log_span = Some(span);
    }

    /// Rejects every log query, regardless of size.
    pub fn reject_all_logs(&self) {
        self.lock().reject_all_logs = true;
    }

    /// The `(from, to)` ranges of every log query issued so far.
    #[must_use]
    pub fn log_calls(&self) -> Vec<(u64, u64)> {
        self.lock().log_calls.clone()
    }

    /// Number of head fetches issued so far.
    #[must_use]
    pub fn head_calls(&self) -> usize {
        self.lock().head_calls
    }
}

impl Transport for MockTransport {
    async fn fetch_head(&self) -> Result<BlockSummary, WatcherError> {
        let mut state = self.lock();
        state.head_calls += 1;
        if let Some(scripted) = state.heads.pop_front() {
            if let Ok(block) = &scripted {
                state.blocks.insert(block.hash, block.clone());
                state.last_head = Some(block.clone());
            }
            return scripted;
        }
        state.last_head.clone().ok_or_else(|| Self::missing())
    }

    async fn fetch_block(&self, hash: B256) -> Result<BlockSummary, WatcherError> {
        self.lock().blocks.get(&hash).cloned().ok_or_else(|| Self::missing())
    }

    async fn fetch_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> Result<Vec<LogEntry>, WatcherError> {
        let mut state = self.lock();
        state.log_calls.push((from, to));

        if state.reject_all_logs {
            return Err(WatcherError::RangeRejected { from, to });
        }
        if let Some(span) = state.max_log_span
            && to - from > span
        {
            return Err(WatcherError::RangeRejected { from, to });
        }

        let mut entries: Vec<LogEntry> = state
            .logs
            .iter()
            .filter(|entry| {
                entry.block_number >= from && entry.block_number <= to && filter.matches(entry)
            })
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.block_number, entry.log_index));
        Ok(entries)
    }

    async fn subscribe_heads(&self) -> Result<HeadStream, WatcherError> {
        let rx = self.lock().push_rx.take().ok_or_else(|| Self::missing())?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
