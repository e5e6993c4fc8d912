use alloy::primitives::B256;

use crate::{BlockSummary, chain_tracker::segment::ChainSegment};

/// Classification of a newly observed block against the tracked chain history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReorgOutcome {
    /// The observation extends the tracked chain.
    ///
    /// `applied` usually holds exactly one block. It is empty for an idempotent re-observation
    /// of an already-tracked block (a duplicate tip, or a stale head from a lagging node), and
    /// holds several blocks when polling skipped heads and the intermediate blocks were walked
    /// back from the remote chain.
    Extended {
        /// Newly canonical blocks, ascending by number.
        applied: Vec<BlockSummary>,
    },
    /// A reorg within the tracked window was reconciled.
    Reorged {
        /// Blocks removed from the canonical chain, descending by number (newest first).
        reverted: Vec<BlockSummary>,
        /// Blocks of the replacement branch, ascending by number.
        applied: Vec<BlockSummary>,
        /// Number of tracked blocks that were reverted.
        depth: u64,
    },
    /// The fork point lies outside the tracked window; the tracked state was left untouched.
    Unrecoverable {
        /// Lower bound on the depth of the observed reorg.
        observed_depth: u64,
        /// Size of the tracked window.
        tracked_depth: u64,
    },
}

/// Bounded in-memory history of the observed chain, and the reorg classification over it.
///
/// The tracker is exclusively owned by one producer loop; nothing here locks. It only ever sees
/// blocks the loop fed it, so when an observed block neither extends the tip nor forks from a
/// tracked block, the caller must walk the remote chain backwards (see
/// [`needs_ancestry`](Self::needs_ancestry)) and hand the collected branch to
/// [`reconcile`](Self::reconcile).
#[derive(Clone, Debug)]
pub struct ChainHistoryTracker {
    segment: ChainSegment,
    tracked_depth: u64,
}

impl ChainHistoryTracker {
    /// Creates a tracker with a history window of `tracked_depth` blocks.
    #[must_use]
    pub fn new(tracked_depth: usize) -> Self {
        let tracked_depth = tracked_depth.max(1);
        Self { segment: ChainSegment::new(tracked_depth), tracked_depth: tracked_depth as u64 }
    }

    /// Classifies `candidate` against the tracked history and applies the result.
    ///
    /// * empty history: seeds the window, [`ReorgOutcome::Extended`];
    /// * already tracked (duplicate tip, or a stale head from a lagging node): idempotent no-op,
    ///   `Extended` with an empty `applied`;
    /// * child of the current tip: appended (evicting the oldest entry past capacity);
    /// * fork from a tracked block: reconciled as a shallow reorg;
    /// * number below the tracked floor: rejected as unrecoverable, ancestry cannot be
    ///   established from the window.
    ///
    /// When [`needs_ancestry`](Self::needs_ancestry) is true for `candidate`, calling `observe`
    /// directly reports the reorg as unrecoverable; walk the remote chain and use
    /// [`reconcile`](Self::reconcile) instead.
    pub fn observe(&mut self, candidate: BlockSummary) -> ReorgOutcome {
        let Some(tip) = self.segment.tip() else {
            self.segment.push(candidate.clone());
            return ReorgOutcome::Extended { applied: vec![candidate] };
        };

        // an already-tracked block competes with nothing; re-observing it must not revert
        // the blocks above it
        if self.segment.contains(&candidate.hash) {
            return ReorgOutcome::Extended { applied: Vec::new() };
        }

        if candidate.parent_hash == tip.hash {
            self.segment.push(candidate.clone());
            return ReorgOutcome::Extended { applied: vec![candidate] };
        }

        let tip_number = tip.number;
        if let Some(floor) = self.segment.floor()
            && candidate.number < floor.number
        {
            return ReorgOutcome::Unrecoverable {
                observed_depth: tip_number.saturating_sub(candidate.number) + 2,
                tracked_depth: self.tracked_depth,
            };
        }

        self.reconcile(vec![candidate])
    }

    /// Whether classifying `candidate` requires ancestry the tracker never stored.
    ///
    /// True when the candidate neither matches nor extends the tip, does not fork from any
    /// tracked block, and is not already below the tracked floor. The caller then fetches the
    /// candidate's ancestors from the remote chain until one of them forks from a tracked block
    /// and passes the branch to [`reconcile`](Self::reconcile).
    #[must_use]
    pub fn needs_ancestry(&self, candidate: &BlockSummary) -> bool {
        let Some(tip) = self.segment.tip() else {
            return false;
        };
        if candidate.hash == tip.hash || candidate.parent_hash == tip.hash {
            return false;
        }
        if let Some(floor) = self.segment.floor()
            && candidate.number <= floor.number
        {
            return false;
        }
        !self.segment.contains(&candidate.parent_hash)
    }

    /// Reconciles a walked-back remote branch against the tracked history.
    ///
    /// `branch` must be hash-linked and ascending, ending at the new remote tip. If the parent of
    /// its first block is tracked, every tracked block above that ancestor is reverted and the
    /// branch applied in its place; with nothing to revert this is a plain extension (gap
    /// catch-up). A branch ending at an already-tracked block is an idempotent no-op. If the
    /// ancestor is not in the window the tracked state is left untouched and the reorg is
    /// reported as unrecoverable.
    pub fn reconcile(&mut self, branch: Vec<BlockSummary>) -> ReorgOutcome {
        let Some(first) = branch.first() else {
            return ReorgOutcome::Extended { applied: Vec::new() };
        };

        // a branch ending at an already-tracked block carries nothing new; reconciling it
        // would revert still-canonical blocks above it
        if let Some(last) = branch.last()
            && self.segment.contains(&last.hash)
        {
            return ReorgOutcome::Extended { applied: Vec::new() };
        }

        if self.segment.is_empty() {
            for block in &branch {
                self.segment.push(block.clone());
            }
            return ReorgOutcome::Extended { applied: branch };
        }

        let Some(ancestor_index) = self.segment.position_of(&first.parent_hash) else {
            let tip_number = self.segment.tip().map_or(first.number, |tip| tip.number);
            let last_number = branch.last().map_or(first.number, |last| last.number);
            let old_side = tip_number.saturating_sub(first.number) + 2;
            let new_side = last_number.saturating_sub(first.number) + 2;
            return ReorgOutcome::Unrecoverable {
                observed_depth: old_side.max(new_side),
                tracked_depth: self.tracked_depth,
            };
        };

        let reverted = self.segment.truncate_above(ancestor_index);
        for block in &branch {
            self.segment.push(block.clone());
        }

        if reverted.is_empty() {
            ReorgOutcome::Extended { applied: branch }
        } else {
            let depth = reverted.len() as u64;
            ReorgOutcome::Reorged { reverted, applied: branch, depth }
        }
    }

    /// Discards all history and re-seeds the window from a known-safe block.
    ///
    /// This is the explicit recovery path after an unrecoverable reorg.
    pub fn resync(&mut self, safe_block: BlockSummary) {
        self.segment.clear();
        self.segment.push(safe_block);
    }

    /// The current canonical tip, if any block has been observed.
    #[must_use]
    pub fn tip(&self) -> Option<&BlockSummary> {
        self.segment.tip()
    }

    /// The oldest tracked block, if any block has been observed.
    #[must_use]
    pub fn floor(&self) -> Option<&BlockSummary> {
        self.segment.floor()
    }

    /// Size of the history window.
    #[must_use]
    pub fn tracked_depth(&self) -> u64 {
        self.tracked_depth
    }

    /// Number of blocks currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segment.len()
    }

    /// Whether any block has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segment.is_empty()
    }

    /// Whether a block with the given hash is tracked.
    #[must_use]
    pub fn contains(&self, hash: &B256) -> bool {
        self.segment.contains(hash)
    }

    #[cfg(test)]
    pub(crate) fn tracked_numbers(&self) -> Vec<u64> {
        self.segment.iter().map(|block| block.number).collect()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{B256, U256};

    use super::*;

    // Deterministic hashes: `branch` disambiguates competing blocks at the same height.
    fn hash(number: u64, branch: u64) -> B256 {
        B256::from(U256::from(number * 1000 + branch))
    }

    fn block(number: u64, branch: u64, parent_branch: u64) -> BlockSummary {
        BlockSummary {
            number,
            hash: hash(number, branch),
            parent_hash: hash(number - 1, parent_branch),
            timestamp: number * 12,
        }
    }

    fn linear(number: u64) -> BlockSummary {
        block(number, 0, 0)
    }

    fn seeded(tracked_depth: usize, numbers: std::ops::RangeInclusive<u64>) -> ChainHistoryTracker {
        let mut tracker = ChainHistoryTracker::new(tracked_depth);
        for n in numbers {
            assert!(matches!(tracker.observe(linear(n)), ReorgOutcome::Extended { .. }));
        }
        tracker
    }

    #[test]
    fn unbroken_chain_is_always_extended() {
        let mut tracker = ChainHistoryTracker::new(4);
        for n in 1..=20 {
            let outcome = tracker.observe(linear(n));
            assert_eq!(outcome, ReorgOutcome::Extended { applied: vec![linear(n)] });
        }
        assert_eq!(tracker.tip(), Some(&linear(20)));
        assert_eq!(tracker.tracked_numbers(), vec![17, 18, 19, 20]);
    }

    #[test]
    fn extension_evicts_oldest_past_capacity() {
        let mut tracker = seeded(3, 10..=12);

        let outcome = tracker.observe(linear(13));

        assert_eq!(outcome, ReorgOutcome::Extended { applied: vec![linear(13)] });
        assert_eq!(tracker.tracked_numbers(), vec![11, 12, 13]);
    }

    #[test]
    fn duplicate_tip_is_an_idempotent_no_op() {
        let mut tracker = seeded(3, 10..=12);

        let outcome = tracker.observe(linear(12));

        assert_eq!(outcome, ReorgOutcome::Extended { applied: Vec::new() });
        assert_eq!(tracker.tracked_numbers(), vec![10, 11, 12]);
    }

    #[test]
    fn stale_tracked_head_is_an_idempotent_no_op() {
        let mut tracker = seeded(3, 10..=12);

        // a lagging node re-serves an older canonical head; nothing may be reverted
        let outcome = tracker.observe(linear(11));

        assert_eq!(outcome, ReorgOutcome::Extended { applied: Vec::new() });
        assert_eq!(tracker.tracked_numbers(), vec![10, 11, 12]);
        assert_eq!(tracker.tip(), Some(&linear(12)));
    }

    #[test]
    fn reconcile_ignores_branches_ending_at_a_tracked_block() {
        let mut tracker = seeded(3, 10..=12);

        let outcome = tracker.reconcile(vec![linear(10), linear(11)]);

        assert_eq!(outcome, ReorgOutcome::Extended { applied: Vec::new() });
        assert_eq!(tracker.tracked_numbers(), vec![10, 11, 12]);
    }

    #[test]
    fn depth_one_reorg_replaces_the_tip() {
        let mut tracker = seeded(3, 10..=12);

        // competing block at height 12, same parent as the old tip
        let replacement = block(12, 1, 0);
        let outcome = tracker.observe(replacement.clone());

        assert_eq!(
            outcome,
            ReorgOutcome::Reorged {
                reverted: vec![linear(12)],
                applied: vec![replacement.clone()],
                depth: 1,
            }
        );
        assert_eq!(tracker.tip(), Some(&replacement));
        // nothing from the old branch survives
        assert!(!tracker.contains(&hash(12, 0)));
    }

    #[test]
    fn reconcile_handles_multi_block_branches() {
        let mut tracker = seeded(5, 10..=14);

        // new branch forks from 12: 13' and 14' replace 13 and 14, plus a new 15'
        let branch =
            vec![block(13, 1, 0), block(14, 1, 1), block(15, 1, 1)];
        let outcome = tracker.reconcile(branch.clone());

        assert_eq!(
            outcome,
            ReorgOutcome::Reorged {
                reverted: vec![linear(14), linear(13)],
                applied: branch,
                depth: 2,
            }
        );
        assert_eq!(tracker.tracked_numbers(), vec![11, 12, 13, 14, 15]);
    }

    #[test]
    fn reconcile_from_tip_is_gap_catch_up_not_a_reorg() {
        let mut tracker = seeded(5, 10..=12);

        let branch = vec![linear(13), linear(14), linear(15)];
        let outcome = tracker.reconcile(branch.clone());

        assert_eq!(outcome, ReorgOutcome::Extended { applied: branch });
        assert_eq!(tracker.tracked_numbers(), vec![11, 12, 13, 14, 15]);
    }

    #[test]
    fn fork_below_the_window_is_unrecoverable_and_leaves_state_untouched() {
        let mut tracker = seeded(3, 10..=12);

        // branch whose first block forks from an ancestor the window never stored
        let outcome = tracker.reconcile(vec![block(10, 1, 1), block(11, 1, 1), block(12, 1, 1)]);

        match outcome {
            ReorgOutcome::Unrecoverable { observed_depth, tracked_depth } => {
                assert!(observed_depth > tracked_depth);
                assert_eq!(tracked_depth, 3);
            }
            other => panic!("expected Unrecoverable, got {other:?}"),
        }
        // idempotent no-op on the tracked state
        assert_eq!(tracker.tracked_numbers(), vec![10, 11, 12]);
        assert_eq!(tracker.tip(), Some(&linear(12)));
    }

    #[test]
    fn block_below_the_floor_is_rejected() {
        let mut tracker = seeded(3, 10..=12);

        let outcome = tracker.observe(block(8, 1, 1));

        assert!(matches!(outcome, ReorgOutcome::Unrecoverable { .. }));
        assert_eq!(tracker.tracked_numbers(), vec![10, 11, 12]);
    }

    #[test]
    fn needs_ancestry_only_for_unknown_parents_within_the_window() {
        let mut tracker = seeded(3, 10..=12);

        // extends the tip: no walk needed
        assert!(!tracker.needs_ancestry(&linear(13)));
        // forks from tracked block 11: no walk needed
        assert!(!tracker.needs_ancestry(&block(12, 1, 0)));
        // below the floor: walking cannot help
        assert!(!tracker.needs_ancestry(&block(9, 1, 1)));
        // parent is an unknown block at height 13: walk required
        assert!(tracker.needs_ancestry(&block(14, 1, 1)));

        tracker.resync(linear(20));
        assert!(!tracker.needs_ancestry(&linear(21)));
    }

    #[test]
    fn resync_reseeds_the_window() {
        let mut tracker = seeded(3, 10..=12);

        tracker.resync(linear(40));

        assert_eq!(tracker.tracked_numbers(), vec![40]);
        assert_eq!(tracker.observe(linear(41)), ReorgOutcome::Extended { applied: vec![linear(41)] });
    }
}
