use std::collections::VecDeque;

use alloy::primitives::B256;

use crate::BlockSummary;

/// Bounded, ordered window of recently observed blocks.
///
/// Blocks are kept in ascending number order; once the configured capacity is exceeded the oldest
/// entry is dropped. After reconciliation every adjacent pair is hash-linked
/// (`next.parent_hash == prev.hash`).
#[derive(Clone, Debug)]
pub(crate) struct ChainSegment {
    inner: VecDeque<BlockSummary>,
    capacity: usize,
}

impl ChainSegment {
    /// Creates an empty segment holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self { inner: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends a block, evicting the oldest entry if the segment is full.
    pub fn push(&mut self, block: BlockSummary) {
        if self.inner.len() == self.capacity {
            self.inner.pop_front();
        }
        self.inner.push_back(block);
    }

    /// Returns the newest tracked block.
    pub fn tip(&self) -> Option<&BlockSummary> {
        self.inner.back()
    }

    /// Returns the oldest tracked block.
    pub fn floor(&self) -> Option<&BlockSummary> {
        self.inner.front()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Index of the tracked block with the given hash, oldest = 0.
    pub fn position_of(&self, hash: &B256) -> Option<usize> {
        self.inner.iter().position(|block| block.hash == *hash)
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.position_of(hash).is_some()
    }

    /// Removes every block above `index`, returning them newest first.
    pub fn truncate_above(&mut self, index: usize) -> Vec<BlockSummary> {
        let mut removed = Vec::new();
        while self.inner.len() > index + 1 {
            if let Some(block) = self.inner.pop_back() {
                removed.push(block);
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockSummary> {
        self.inner.iter()
    }
}
