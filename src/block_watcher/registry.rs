use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use crate::{CallbackError, EventFilter, LogEntry, StreamEvent};

/// Opaque token identifying one subscription.
///
/// Returned by `watch_blocks`/`watch_events`; consumers hold only the id and pass it back to
/// `unwatch` for cancellation. The callback itself is owned exclusively by the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub(crate) type BlockCallback =
    Arc<dyn Fn(&StreamEvent) -> Result<(), CallbackError> + Send + Sync>;
pub(crate) type EventCallback =
    Arc<dyn Fn(&LogEntry) -> Result<(), CallbackError> + Send + Sync>;

enum Sink {
    Blocks(BlockCallback),
    Events { filter: EventFilter, callback: EventCallback },
}

struct Entry {
    active: Arc<AtomicBool>,
    sink: Sink,
}

/// Snapshot of one event subscription, taken for per-block log delivery.
pub(crate) struct EventSink {
    pub id: SubscriptionId,
    pub active: Arc<AtomicBool>,
    pub filter: EventFilter,
    pub callback: EventCallback,
}

/// Fan-out of stream events to subscriber callbacks.
///
/// Callbacks are invoked on a copy-on-iterate snapshot taken under a short-lived lock, so a
/// callback may unsubscribe itself or register new subscriptions without corrupting an in-flight
/// fan-out. Each entry carries an `active` flag flipped by [`unregister`](Self::unregister) and
/// checked immediately before invocation: once `unregister` returns, that callback can no longer
/// fire. A failing callback is isolated; its error goes to the log sink and delivery to the
/// remaining subscribers continues.
pub(crate) struct SubscriptionRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(0), entries: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, sink: Sink) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Entry { active: Arc::new(AtomicBool::new(true)), sink });
        SubscriptionId(id)
    }

    pub fn register_blocks(&self, callback: BlockCallback) -> SubscriptionId {
        self.insert(Sink::Blocks(callback))
    }

    pub fn register_events(&self, filter: EventFilter, callback: EventCallback) -> SubscriptionId {
        self.insert(Sink::Events { filter, callback })
    }

    /// Removes a subscription. After this returns the callback will not be invoked again, even
    /// by a fan-out that snapshotted the entry concurrently.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let Some(entry) = self.lock().remove(&id.0) else {
            return false;
        };
        entry.active.store(false, Ordering::SeqCst);
        true
    }

    /// Deactivates every subscription. Used when the stream terminates.
    pub fn close_all(&self) {
        let mut entries = self.lock();
        for entry in entries.values() {
            entry.active.store(false, Ordering::SeqCst);
        }
        entries.clear();
    }

    /// Fans `event` out to all active block subscribers.
    pub fn publish(&self, event: &StreamEvent) {
        let snapshot: Vec<(SubscriptionId, Arc<AtomicBool>, BlockCallback)> = self
            .lock()
            .iter()
            .filter_map(|(id, entry)| match &entry.sink {
                Sink::Blocks(callback) => {
                    Some((SubscriptionId(*id), Arc::clone(&entry.active), Arc::clone(callback)))
                }
                Sink::Events { .. } => None,
            })
            .collect();

        for (id, active, callback) in snapshot {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(err) = callback(event) {
                error!(subscription = id.0, error = %err, "block subscriber callback failed");
            }
        }
    }

    /// Snapshots the active event subscriptions for per-block log delivery.
    pub fn event_sinks(&self) -> Vec<EventSink> {
        self.lock()
            .iter()
            .filter_map(|(id, entry)| match &entry.sink {
                Sink::Events { filter, callback } => Some(EventSink {
                    id: SubscriptionId(*id),
                    active: Arc::clone(&entry.active),
                    filter: filter.clone(),
                    callback: Arc::clone(callback),
                }),
                Sink::Blocks(_) => None,
            })
            .collect()
    }

    /// Delivers one log entry to an event subscription, isolating callback failures.
    pub fn deliver_log(sink: &EventSink, entry: &LogEntry) {
        if !sink.active.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = (sink.callback)(entry) {
            error!(subscription = sink.id.0, error = %err, "event subscriber callback failed");
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}
