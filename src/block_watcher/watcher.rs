//! The block stream controller.
//!
//! [`BlockWatcher`] owns one producer loop per started stream. The loop fetches heads (timer- or
//! push-driven), serializes every observation through its [`ChainHistoryTracker`], and publishes
//! ordered [`StreamEvent`]s through the subscription registry. Reverts for a reorg are always
//! published before the replacement applies, so consumers never see two conflicting chains at
//! once.

use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    BlockSummary, CallbackError, EventFilter, LogEntry, LogRangeFetcher, LogRangeRequest,
    StreamEvent, WatcherError,
    block_watcher::{
        StreamMode,
        registry::{SubscriptionId, SubscriptionRegistry},
    },
    chain_tracker::{ChainHistoryTracker, ReorgOutcome},
    transport::{HeadStream, Transport},
};

/// Chain-aware block and event stream controller.
///
/// Built via [`BlockWatcherBuilder`](crate::BlockWatcherBuilder). Register subscribers with
/// [`watch_blocks`](Self::watch_blocks) / [`watch_events`](Self::watch_events), then call
/// [`start`](Self::start) to spawn the producer loop. The returned [`StreamHandle`] stops the
/// loop; [`unwatch`](Self::unwatch) cancels a single subscription.
pub struct BlockWatcher<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) tracked_depth: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) max_walk_back: usize,
    pub(crate) mode: StreamMode,
}

/// Handle to a running block stream.
///
/// Dropping the handle leaves the stream running detached; call [`stop`](Self::stop) to end it.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    /// Stops the stream and waits for the producer loop to exit.
    ///
    /// After this returns no subscriber callback fires. An in-flight transport call may still
    /// complete inside the loop task and is discarded.
    pub async fn stop(self) {
        self.cancel.cancel();
        _ = self.task.await;
    }
}

impl<T: Transport> BlockWatcher<T> {
    /// Shared handle to the underlying transport.
    #[must_use]
    pub fn transport(&self) -> Arc<T> {
        Arc::clone(&self.transport)
    }

    /// Registers a block subscriber.
    ///
    /// The callback receives every [`StreamEvent`] in publish order. A returned error is logged
    /// and isolated; it never affects other subscribers or the producer loop.
    pub fn watch_blocks<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StreamEvent) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.registry.register_blocks(Arc::new(callback))
    }

    /// Registers an event subscriber.
    ///
    /// For every applied block, logs matching `filter` are fetched and delivered per entry in
    /// `(block_number, log_index)` order.
    pub fn watch_events<F>(&self, filter: EventFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&LogEntry) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.registry.register_events(filter, Arc::new(callback))
    }

    /// Cancels a subscription. After this returns the callback will not be invoked again.
    pub fn unwatch(&self, id: SubscriptionId) -> bool {
        self.registry.unregister(id)
    }

    /// One-shot ordered log query over a block range, with automatic range bisection.
    ///
    /// See [`LogRangeFetcher`].
    ///
    /// # Errors
    ///
    /// * [`WatcherError::InvalidRange`] - if the resolved range is inverted.
    /// * [`WatcherError::RangeRejected`] - if a single-block range is still refused.
    /// * [`WatcherError::Transport`] / [`WatcherError::Timeout`] - after retry exhaustion.
    pub async fn get_logs(&self, request: LogRangeRequest) -> Result<Vec<LogEntry>, WatcherError> {
        LogRangeFetcher::new(Arc::clone(&self.transport)).fetch(request).await
    }

    /// Spawns the producer loop and returns its handle.
    ///
    /// In push mode the head subscription is established before this returns, so subscription
    /// failures surface here rather than on the stream.
    ///
    /// # Errors
    ///
    /// * [`WatcherError::Transport`] / [`WatcherError::Timeout`] - if establishing the push head
    ///   subscription fails.
    pub async fn start(&self) -> Result<StreamHandle, WatcherError> {
        let heads = match self.mode {
            StreamMode::Push => Some(self.transport.subscribe_heads().await?),
            StreamMode::Poll => None,
        };

        let cancel = CancellationToken::new();
        let ctx = StreamContext {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            tracker: ChainHistoryTracker::new(self.tracked_depth),
            max_walk_back: self.max_walk_back,
        };

        let task = match heads {
            Some(heads) => {
                debug!("starting push block stream");
                tokio::spawn(run_push_loop(ctx, heads, cancel.clone()))
            }
            None => {
                debug!(poll_interval = ?self.poll_interval, "starting poll block stream");
                tokio::spawn(run_poll_loop(ctx, self.poll_interval, cancel.clone()))
            }
        };

        Ok(StreamHandle { cancel, task })
    }
}

struct StreamContext<T: Transport> {
    transport: Arc<T>,
    registry: Arc<SubscriptionRegistry>,
    tracker: ChainHistoryTracker,
    max_walk_back: usize,
}

async fn run_poll_loop<T: Transport>(
    mut ctx: StreamContext<T>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("poll block stream cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let keep_going = tokio::select! {
            () = cancel.cancelled() => {
                debug!("poll block stream cancelled mid-tick");
                return;
            }
            keep_going = poll_tick(&mut ctx) => keep_going,
        };
        if !keep_going {
            return;
        }
    }
}

async fn poll_tick<T: Transport>(ctx: &mut StreamContext<T>) -> bool {
    match ctx.transport.fetch_head().await {
        Ok(candidate) => process_candidate(ctx, candidate).await,
        Err(err) => {
            warn!(error = %err, "head fetch failed, surfacing and retrying next tick");
            ctx.registry.publish(&StreamEvent::TransportFailed(err));
            true
        }
    }
}

async fn run_push_loop<T: Transport>(
    mut ctx: StreamContext<T>,
    mut heads: HeadStream,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                debug!("push block stream cancelled");
                return;
            }
            next = heads.next() => next,
        };

        let keep_going = match next {
            Some(Ok(candidate)) => {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("push block stream cancelled mid-notification");
                        return;
                    }
                    keep_going = process_candidate(&mut ctx, candidate) => keep_going,
                }
            }
            Some(Err(err)) => {
                warn!(error = %err, "head notification failed");
                ctx.registry.publish(&StreamEvent::TransportFailed(err));
                true
            }
            None => {
                warn!("head subscription ended");
                ctx.registry.publish(&StreamEvent::StreamClosed(WatcherError::SubscriptionClosed));
                ctx.registry.close_all();
                false
            }
        };
        if !keep_going {
            return;
        }
    }
}

/// Feeds one observed head through the tracker and publishes the outcome.
///
/// Returns `false` when the stream must stop (unrecoverable reorg).
async fn process_candidate<T: Transport>(
    ctx: &mut StreamContext<T>,
    candidate: BlockSummary,
) -> bool {
    debug!(block_number = candidate.number, block_hash = %candidate.hash, "observed head");

    let outcome = if ctx.tracker.needs_ancestry(&candidate) {
        match walk_back(&*ctx.transport, &ctx.tracker, candidate, ctx.max_walk_back).await {
            Ok(branch) => ctx.tracker.reconcile(branch),
            Err(err) => {
                warn!(error = %err, "ancestry walk failed, surfacing and retrying next tick");
                ctx.registry.publish(&StreamEvent::TransportFailed(err));
                return true;
            }
        }
    } else {
        ctx.tracker.observe(candidate)
    };

    publish_outcome(ctx, outcome).await
}

/// Collects the remote branch ending at `candidate`, walking parent hashes until the branch
/// forks from a tracked block, drops to the tracked floor, or exceeds `max_walk_back` fetches.
async fn walk_back<T: Transport>(
    transport: &T,
    tracker: &ChainHistoryTracker,
    candidate: BlockSummary,
    max_walk_back: usize,
) -> Result<Vec<BlockSummary>, WatcherError> {
    let floor_number = tracker.floor().map_or(0, |floor| floor.number);

    // collected newest-first, reversed before returning
    let mut branch = vec![candidate];
    for _ in 0..max_walk_back {
        let Some(oldest) = branch.last().cloned() else {
            break;
        };
        if tracker.contains(&oldest.parent_hash) || oldest.number <= floor_number {
            break;
        }
        let parent = transport.fetch_block(oldest.parent_hash).await?;
        debug!(block_number = parent.number, block_hash = %parent.hash, "walked back ancestor");
        branch.push(parent);
    }

    branch.reverse();
    Ok(branch)
}

async fn publish_outcome<T: Transport>(ctx: &StreamContext<T>, outcome: ReorgOutcome) -> bool {
    match outcome {
        ReorgOutcome::Extended { applied } => {
            for block in applied {
                apply_block(ctx, block).await;
            }
            true
        }
        ReorgOutcome::Reorged { reverted, applied, depth } => {
            info!(depth = depth, "reorg reconciled");
            // reverts first, newest to oldest, so consumers never hold two conflicting chains
            for block in reverted {
                ctx.registry.publish(&StreamEvent::Reverted(block));
            }
            for block in applied {
                apply_block(ctx, block).await;
            }
            true
        }
        ReorgOutcome::Unrecoverable { observed_depth, tracked_depth } => {
            let err = WatcherError::UnrecoverableReorg { observed_depth, tracked_depth };
            error!(
                observed_depth = observed_depth,
                tracked_depth = tracked_depth,
                "unrecoverable reorg, stopping stream"
            );
            ctx.registry.publish(&StreamEvent::StreamClosed(err));
            ctx.registry.close_all();
            false
        }
    }
}

/// Publishes one applied block and delivers its logs to event subscriptions.
async fn apply_block<T: Transport>(ctx: &StreamContext<T>, block: BlockSummary) {
    ctx.registry.publish(&StreamEvent::Applied(block.clone()));

    for sink in ctx.registry.event_sinks() {
        match ctx.transport.fetch_logs(block.number, block.number, &sink.filter).await {
            Ok(entries) => {
                for entry in &entries {
                    SubscriptionRegistry::deliver_log(&sink, entry);
                }
            }
            Err(err) => {
                // isolated per subscription: other sinks and the loop keep going
                error!(
                    block_number = block.number,
                    error = %err,
                    "failed to fetch logs for applied block"
                );
            }
        }
    }
}
