//! Aggregate Reputation State
//!
//! One record per user, created lazily on the first transaction. The raw
//! signed total is retained for audit; the zero floor is applied only at
//! the read boundary, never destructively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Activity counters fed by registered action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    HelpfulAnswers,
    AcceptedSolutions,
    UpvotesReceived,
    DownvotesReceived,
    QualityPosts,
    VerifiedContributions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationCounters {
    pub helpful_answers: u64,
    pub accepted_solutions: u64,
    pub upvotes_received: u64,
    pub downvotes_received: u64,
    pub quality_posts: u64,
    pub verified_contributions: u64,
}

impl ReputationCounters {
    pub fn bump(&mut self, kind: CounterKind) {
        *self.slot(kind) += 1;
    }

    /// Undo one occurrence, used when a transaction is reversed.
    pub fn unbump(&mut self, kind: CounterKind) {
        let slot = self.slot(kind);
        *slot = slot.saturating_sub(1);
    }

    fn slot(&mut self, kind: CounterKind) -> &mut u64 {
        match kind {
            CounterKind::HelpfulAnswers => &mut self.helpful_answers,
            CounterKind::AcceptedSolutions => &mut self.accepted_solutions,
            CounterKind::UpvotesReceived => &mut self.upvotes_received,
            CounterKind::DownvotesReceived => &mut self.downvotes_received,
            CounterKind::QualityPosts => &mut self.quality_posts,
            CounterKind::VerifiedContributions => &mut self.verified_contributions,
        }
    }
}

/// Aggregate reputation record for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReputationState {
    pub user_id: u64,

    /// Signed sum of all non-reversed deltas. May be negative internally;
    /// the display floor lives in `total()`.
    pub raw_total: i64,

    /// Signed subtotals per classification category
    pub by_category: BTreeMap<String, i64>,

    pub counters: ReputationCounters,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserReputationState {
    pub fn new(user_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            raw_total: 0,
            by_category: BTreeMap::new(),
            counters: ReputationCounters::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Displayed reputation: floored at zero.
    pub fn total(&self) -> u64 {
        self.raw_total.max(0) as u64
    }

    pub fn apply_delta(&mut self, delta: i64, category: Option<&str>, now: DateTime<Utc>) {
        self.raw_total += delta;
        if let Some(category) = category {
            *self.by_category.entry(category.to_string()).or_insert(0) += delta;
        }
        self.updated_at = now;
    }

    pub fn snapshot(&self) -> ReputationSnapshot {
        ReputationSnapshot {
            user_id: self.user_id,
            total: self.total(),
            by_category: self.by_category.clone(),
            counters: self.counters,
        }
    }
}

/// Read-only view handed to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub user_id: u64,
    pub total: u64,
    pub by_category: BTreeMap<String, i64>,
    pub counters: ReputationCounters,
}

impl ReputationSnapshot {
    /// Zero-valued snapshot for users with no ledger activity yet.
    pub fn empty(user_id: u64) -> Self {
        Self {
            user_id,
            total: 0,
            by_category: BTreeMap::new(),
            counters: ReputationCounters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_floors_at_zero() {
        let now = Utc::now();
        let mut state = UserReputationState::new(1, now);

        state.apply_delta(15, Some("contribution"), now);
        assert_eq!(state.total(), 15);

        state.apply_delta(-100, Some("penalty"), now);
        assert_eq!(state.raw_total, -85);
        assert_eq!(state.total(), 0);

        // Audit subtotals keep their sign
        assert_eq!(state.by_category["penalty"], -100);
    }

    #[test]
    fn test_counter_bump_and_unbump() {
        let mut counters = ReputationCounters::default();
        counters.bump(CounterKind::UpvotesReceived);
        counters.bump(CounterKind::UpvotesReceived);
        counters.unbump(CounterKind::UpvotesReceived);
        assert_eq!(counters.upvotes_received, 1);

        // Never underflows
        counters.unbump(CounterKind::QualityPosts);
        assert_eq!(counters.quality_posts, 0);
    }
}
