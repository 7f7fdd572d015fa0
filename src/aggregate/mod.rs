//! Per-User Reputation Aggregation
//!
//! Maintains the derived reputation state for every user: total score,
//! per-category subtotals, and activity counters. Recomputed incrementally
//! as ledger transactions are appended or reversed.

pub mod aggregator;
pub mod state;

pub use aggregator::Aggregator;
pub use state::{CounterKind, ReputationCounters, ReputationSnapshot, UserReputationState};
