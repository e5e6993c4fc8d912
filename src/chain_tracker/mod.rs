//! Bounded in-memory chain history and reorg classification.

mod segment;
mod tracker;

pub use tracker::{ChainHistoryTracker, ReorgOutcome};
