use std::{sync::Arc, time::Duration};

use alloy::{
    consensus::BlockHeader,
    eips::BlockNumberOrTag,
    network::{BlockResponse, Ethereum, Network, primitives::HeaderResponse},
    primitives::B256,
    providers::{Provider, RootProvider},
    rpc::types::Filter,
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tokio_stream::StreamExt;

use crate::{
    BlockSummary, EventFilter, LogEntry, WatcherError,
    transport::{HeadStream, Transport},
};

/// Default per-call timeout for [`RpcTransport`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(200);

/// Retry shape applied to transient transport failures.
///
/// Exponential backoff starting at `min_delay`, at most `max_attempts` total attempts per call.
/// Only connectivity-level failures are retried; RPC-level rejections (such as an oversized log
/// range) surface immediately.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one. Must be greater than zero.
    pub max_attempts: usize,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, min_delay: DEFAULT_MIN_DELAY }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_min_delay(self.min_delay)
    }
}

/// Builder for [`RpcTransport`].
#[derive(Clone, Debug)]
pub struct RpcTransportBuilder<N: Network = Ethereum> {
    provider: RootProvider<N>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl<N: Network> RpcTransportBuilder<N> {
    /// Starts a builder around an existing alloy provider.
    #[must_use]
    pub fn new(provider: RootProvider<N>) -> Self {
        Self { provider, call_timeout: DEFAULT_CALL_TIMEOUT, retry: RetryPolicy::default() }
    }

    /// Sets the overall per-call timeout, covering all retry attempts of one call.
    #[must_use]
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validates the configuration and builds the transport.
    ///
    /// # Errors
    ///
    /// [`WatcherError::InvalidMaxAttempts`] when the retry policy allows zero attempts.
    pub fn build(self) -> Result<RpcTransport<N>, WatcherError> {
        if self.retry.max_attempts == 0 {
            return Err(WatcherError::InvalidMaxAttempts);
        }
        Ok(RpcTransport { provider: self.provider, call_timeout: self.call_timeout, retry: self.retry })
    }
}

/// [`Transport`] implementation over an alloy [`RootProvider`].
///
/// Every call runs under the configured timeout with exponential-backoff retries for transient
/// connectivity failures. Oversized-range rejections from the node are classified as
/// [`WatcherError::RangeRejected`] so the log fetcher can bisect.
#[derive(Clone, Debug)]
pub struct RpcTransport<N: Network = Ethereum> {
    provider: RootProvider<N>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl<N: Network> RpcTransport<N> {
    /// Starts a builder around an existing alloy provider.
    #[must_use]
    pub fn builder(provider: RootProvider<N>) -> RpcTransportBuilder<N> {
        RpcTransportBuilder::new(provider)
    }

    /// Returns the underlying provider.
    #[must_use]
    pub fn provider(&self) -> &RootProvider<N> {
        &self.provider
    }

    /// Executes `operation` with retry and a total timeout.
    ///
    /// The whole retry sequence shares one `call_timeout` budget; expiry maps to
    /// [`WatcherError::Timeout`].
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, WatcherError>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let attempt = || operation(self.provider.clone());
        let result = timeout(
            self.call_timeout,
            attempt
                .retry(self.retry.backoff())
                .when(|err: &RpcError<TransportErrorKind>| matches!(err, RpcError::Transport(_)))
                .notify(|err: &RpcError<TransportErrorKind>, after: Duration| {
                    info!(error = %err, after = ?after, "transient transport error, retrying");
                })
                .sleep(tokio::time::sleep),
        )
        .await;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(WatcherError::Timeout),
        }
    }
}

impl<N: Network> Transport for RpcTransport<N> {
    async fn fetch_head(&self) -> Result<BlockSummary, WatcherError> {
        debug!("eth_getBlockByNumber(latest) called");
        let block = self
            .execute(|provider| async move {
                provider.get_block_by_number(BlockNumberOrTag::Latest).await
            })
            .await?
            .ok_or_else(|| WatcherError::Transport(Arc::new(RpcError::NullResp)))?;
        Ok(summarize::<N>(&block))
    }

    async fn fetch_block(&self, hash: B256) -> Result<BlockSummary, WatcherError> {
        debug!(block_hash = %hash, "eth_getBlockByHash called");
        let block = self
            .execute(move |provider| async move { provider.get_block_by_hash(hash).await })
            .await?
            .ok_or_else(|| WatcherError::Transport(Arc::new(RpcError::NullResp)))?;
        Ok(summarize::<N>(&block))
    }

    async fn fetch_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> Result<Vec<LogEntry>, WatcherError> {
        debug!(from_block = from, to_block = to, "eth_getLogs called");
        let log_filter = to_rpc_filter(from, to, filter);
        let result = self
            .execute(move |provider| {
                let log_filter = log_filter.clone();
                async move { provider.get_logs(&log_filter).await }
            })
            .await;

        let logs = match result {
            Ok(logs) => logs,
            Err(WatcherError::Transport(err)) if is_range_rejection(&err) => {
                return Err(WatcherError::RangeRejected { from, to });
            }
            Err(err) => return Err(err),
        };

        let mut entries: Vec<LogEntry> = logs
            .iter()
            .filter_map(|log| {
                let (Some(block_number), Some(log_index)) = (log.block_number, log.log_index)
                else {
                    warn!("dropping log without block number or index");
                    return None;
                };
                Some(LogEntry {
                    block_number,
                    log_index,
                    address: log.inner.address,
                    topics: log.inner.data.topics().to_vec(),
                    data: log.inner.data.data.clone(),
                })
            })
            .collect();
        entries.sort_by_key(|entry| (entry.block_number, entry.log_index));
        Ok(entries)
    }

    async fn subscribe_heads(&self) -> Result<HeadStream, WatcherError> {
        debug!("eth_subscribe(newHeads) called");
        let subscription = self
            .execute(|provider| async move { provider.subscribe_blocks().await })
            .await?;

        let stream = subscription.into_stream().map(|header| {
            Ok(BlockSummary {
                number: header.number(),
                hash: header.hash(),
                parent_hash: header.parent_hash(),
                timestamp: header.timestamp(),
            })
        });
        Ok(Box::pin(stream))
    }
}

fn summarize<N: Network>(block: &N::BlockResponse) -> BlockSummary {
    let header = block.header();
    BlockSummary {
        number: header.number(),
        hash: header.hash(),
        parent_hash: header.parent_hash(),
        timestamp: header.timestamp(),
    }
}

fn to_rpc_filter(from: u64, to: u64, filter: &EventFilter) -> Filter {
    let mut rpc_filter = Filter::new().from_block(from).to_block(to);
    if let Some(address) = filter.address {
        rpc_filter = rpc_filter.address(address);
    }
    if let Some(topic) = filter.topics[0] {
        rpc_filter = rpc_filter.event_signature(topic);
    }
    if let Some(topic) = filter.topics[1] {
        rpc_filter = rpc_filter.topic1(topic);
    }
    if let Some(topic) = filter.topics[2] {
        rpc_filter = rpc_filter.topic2(topic);
    }
    if let Some(topic) = filter.topics[3] {
        rpc_filter = rpc_filter.topic3(topic);
    }
    rpc_filter
}

/// Whether an RPC error response is the node refusing a log query as too large.
///
/// There is no standard code for this; the common providers either use -32005 or put a
/// recognizable phrase in the message.
fn is_range_rejection(error: &RpcError<TransportErrorKind>) -> bool {
    let RpcError::ErrorResp(payload) = error else {
        return false;
    };
    if payload.code == -32005 {
        return true;
    }
    let message = payload.message.to_lowercase();
    message.contains("block range")
        || message.contains("query returned more than")
        || message.contains("response size exceeded")
        || message.contains("range is too large")
}
