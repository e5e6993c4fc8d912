//! Range-bounded log fetching with automatic bisection.

use std::{pin::Pin, sync::Arc};

use crate::{
    BlockTarget, EventFilter, LogEntry, LogRangeRequest, WatcherError, transport::Transport,
};

/// One-shot, stateless log fetcher.
///
/// Issues a [`LogRangeRequest`] as-is and, when the remote node rejects the range as too large,
/// bisects it at the midpoint and re-issues both halves concurrently. Recursion terminates
/// because every bisection strictly shrinks the range; a single-block range that is still
/// rejected surfaces [`WatcherError::RangeRejected`] as-is.
///
/// Results are ordered by `(block_number, log_index)` ascending regardless of how the range was
/// split. Each call is independent; nothing is cached.
pub struct LogRangeFetcher<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> LogRangeFetcher<T> {
    /// Creates a fetcher over a shared transport.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Fetches all logs in the requested range.
    ///
    /// A [`BlockTarget::Latest`] upper bound is resolved against the remote head once, at
    /// request time.
    ///
    /// # Errors
    ///
    /// * [`WatcherError::InvalidRange`] - if `from_block` exceeds the resolved `to_block`.
    /// * [`WatcherError::RangeRejected`] - if a single-block range is still refused.
    /// * [`WatcherError::Transport`] / [`WatcherError::Timeout`] - after retry exhaustion.
    pub async fn fetch(&self, request: LogRangeRequest) -> Result<Vec<LogEntry>, WatcherError> {
        let from = request.from_block;
        let to = match request.to_block {
            BlockTarget::Number(number) => number,
            BlockTarget::Latest => self.transport.fetch_head().await?.number,
        };
        if from > to {
            return Err(WatcherError::InvalidRange { from, to });
        }

        debug!(from_block = from, to_block = to, "fetching log range");
        self.fetch_span(from, to, &request.filter).await
    }

    /// Fetches `[from, to]`, bisecting on rejection. Boxed for async recursion.
    fn fetch_span<'a>(
        &'a self,
        from: u64,
        to: u64,
        filter: &'a EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogEntry>, WatcherError>> + Send + 'a>> {
        Box::pin(async move {
            match self.transport.fetch_logs(from, to, filter).await {
                Ok(entries) => Ok(entries),
                Err(WatcherError::RangeRejected { .. }) if from < to => {
                    let mid = from + (to - from) / 2;
                    debug!(
                        from_block = from,
                        to_block = to,
                        mid_block = mid,
                        "log range rejected, bisecting"
                    );
                    // disjoint halves may run concurrently; concatenation preserves order
                    let (mut lower, upper) = tokio::try_join!(
                        self.fetch_span(from, mid, filter),
                        self.fetch_span(mid + 1, to, filter),
                    )?;
                    lower.extend(upper);
                    Ok(lower)
                }
                Err(err) => Err(err),
            }
        })
    }
}
