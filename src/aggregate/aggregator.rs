//! Incremental Aggregator
//!
//! Applies each ledger append or reversal as an atomic delta to the owning
//! user's aggregate record. State is sharded per user in a `DashMap`; the
//! engine additionally serializes same-user ledger mutations with a
//! per-user lock so the read-modify-write here never interleaves for one
//! user while different users proceed without contention.

use crate::aggregate::state::{CounterKind, ReputationSnapshot, UserReputationState};
use crate::ledger::ReputationTransaction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Aggregator {
    states: DashMap<u64, UserReputationState>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed forward transaction to the live aggregate.
    pub fn apply_forward(
        &self,
        tx: &ReputationTransaction,
        counter: Option<CounterKind>,
        now: DateTime<Utc>,
    ) {
        let mut state = self
            .states
            .entry(tx.user_id)
            .or_insert_with(|| UserReputationState::new(tx.user_id, now));
        state.apply_delta(tx.reputation_change, tx.category.as_deref(), now);
        if let Some(kind) = counter {
            state.counters.bump(kind);
        }

        debug!(
            user_id = tx.user_id,
            transaction_id = tx.id,
            delta = tx.reputation_change,
            raw_total = state.raw_total,
            "Applied forward transaction"
        );
    }

    /// Subtract a reversed transaction's original delta so the aggregate
    /// reads as if it never happened.
    pub fn apply_reversal(
        &self,
        tx: &ReputationTransaction,
        counter: Option<CounterKind>,
        now: DateTime<Utc>,
    ) {
        let mut state = self
            .states
            .entry(tx.user_id)
            .or_insert_with(|| UserReputationState::new(tx.user_id, now));
        state.apply_delta(-tx.reputation_change, tx.category.as_deref(), now);
        if let Some(kind) = counter {
            state.counters.unbump(kind);
        }

        debug!(
            user_id = tx.user_id,
            transaction_id = tx.id,
            delta = -tx.reputation_change,
            raw_total = state.raw_total,
            "Applied reversal"
        );
    }

    /// Seed a user's aggregate from persisted state (cache miss path).
    /// Keeps an existing in-memory record if one appeared concurrently.
    pub fn hydrate(&self, state: UserReputationState) {
        self.states.entry(state.user_id).or_insert(state);
    }

    /// Floored read-boundary view; zero-valued for unknown users.
    pub fn snapshot(&self, user_id: u64) -> ReputationSnapshot {
        self.states
            .get(&user_id)
            .map(|s| s.snapshot())
            .unwrap_or_else(|| ReputationSnapshot::empty(user_id))
    }

    /// Raw audit view including the unfloored total.
    pub fn raw_state(&self, user_id: u64) -> Option<UserReputationState> {
        self.states.get(&user_id).map(|s| s.clone())
    }

    pub fn total(&self, user_id: u64) -> u64 {
        self.states.get(&user_id).map(|s| s.total()).unwrap_or(0)
    }

    pub fn is_initialized(&self, user_id: u64) -> bool {
        self.states.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ReputationTransaction;

    fn tx(id: u64, user_id: u64, delta: i64, category: Option<&str>) -> ReputationTransaction {
        ReputationTransaction {
            id,
            user_id,
            action_type: "answer_accepted".to_string(),
            reputation_change: delta,
            category: category.map(|c| c.to_string()),
            related_entity: None,
            triggered_by: None,
            is_validated: true,
            is_reversed: false,
            reversed_by: None,
            reversal_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_lazy_initialization() {
        let aggregator = Aggregator::new();
        assert!(!aggregator.is_initialized(1));
        assert_eq!(aggregator.snapshot(1).total, 0);

        aggregator.apply_forward(&tx(1, 1, 15, Some("contribution")), None, Utc::now());
        assert!(aggregator.is_initialized(1));
        assert_eq!(aggregator.total(1), 15);
    }

    #[test]
    fn test_reversal_restores_floored_total() {
        let aggregator = Aggregator::new();
        let now = Utc::now();

        aggregator.apply_forward(&tx(1, 7, 15, None), None, now);
        let spam = tx(2, 7, -100, Some("penalty"));
        aggregator.apply_forward(&spam, None, now);
        assert_eq!(aggregator.total(7), 0);
        assert_eq!(aggregator.raw_state(7).unwrap().raw_total, -85);

        aggregator.apply_reversal(&spam, None, now);
        assert_eq!(aggregator.total(7), 15);
    }

    #[test]
    fn test_counters_follow_reversal() {
        let aggregator = Aggregator::new();
        let now = Utc::now();
        let t = tx(1, 3, 10, None);

        aggregator.apply_forward(&t, Some(CounterKind::UpvotesReceived), now);
        assert_eq!(aggregator.snapshot(3).counters.upvotes_received, 1);

        aggregator.apply_reversal(&t, Some(CounterKind::UpvotesReceived), now);
        assert_eq!(aggregator.snapshot(3).counters.upvotes_received, 0);
    }
}
