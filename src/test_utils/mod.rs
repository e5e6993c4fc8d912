//! Scriptable transport mock and helpers for exercising the watcher without a live node.

mod transport;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use alloy::primitives::{B256, U256};

pub use transport::MockTransport;

use crate::{BlockSummary, CallbackError, StreamEvent};

/// Deterministic block hash for tests. `branch` disambiguates competing blocks at one height.
#[must_use]
pub fn block_hash(number: u64, branch: u64) -> B256 {
    B256::from(U256::from(number.wrapping_mul(1_000).wrapping_add(branch)))
}

/// Deterministic block summary linked to `block_hash(number - 1, parent_branch)`.
#[must_use]
pub fn test_block(number: u64, branch: u64, parent_branch: u64) -> BlockSummary {
    BlockSummary {
        number,
        hash: block_hash(number, branch),
        parent_hash: block_hash(number.wrapping_sub(1), parent_branch),
        timestamp: number * 12,
    }
}

/// Block on the canonical test chain (branch 0).
#[must_use]
pub fn canonical_block(number: u64) -> BlockSummary {
    test_block(number, 0, 0)
}

/// Thread-safe recorder for [`StreamEvent`]s delivered to a block subscription.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl EventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends every delivered event to this recorder.
    #[must_use]
    pub fn callback(
        &self,
    ) -> impl Fn(&StreamEvent) -> Result<(), CallbackError> + Send + Sync + 'static + use<> {
        let events = Arc::clone(&self.events);
        move |event| {
            events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
            Ok(())
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(deadline.is_ok(), "timed out waiting for {description}");
}
