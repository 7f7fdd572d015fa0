//! Ledger Transaction Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to the content that triggered an event. The engine
/// never resolves it; it exists for audit and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_type: String,
    pub entity_id: u64,
}

impl RelatedEntity {
    pub fn new(entity_type: impl Into<String>, entity_id: u64) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }
}

/// One committed reputation event. Immutable except for the reversal flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationTransaction {
    pub id: u64,
    pub user_id: u64,
    pub action_type: String,
    /// Signed delta as committed. Retained unchanged after reversal for audit.
    pub reputation_change: i64,
    pub category: Option<String>,
    pub related_entity: Option<RelatedEntity>,
    /// Actor whose action produced the event, when distinct from the owner
    pub triggered_by: Option<u64>,
    pub is_validated: bool,
    pub is_reversed: bool,
    pub reversed_by: Option<u64>,
    pub reversal_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReputationTransaction {
    /// Contribution of this entry to the live aggregate.
    pub fn live_delta(&self) -> i64 {
        if self.is_reversed {
            0
        } else {
            self.reputation_change
        }
    }
}

/// Audit record linking a reversal to its original transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalRecord {
    pub id: u64,
    pub transaction_id: u64,
    /// Owner of the reversed transaction
    pub user_id: u64,
    pub reversed_by: u64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// History query filters. Defaults include reversed entries (audit view).
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub action_type: Option<String>,
    pub category: Option<String>,
    pub exclude_reversed: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &ReputationTransaction) -> bool {
        if let Some(action_type) = &self.action_type {
            if &tx.action_type != action_type {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if tx.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if self.exclude_reversed && tx.is_reversed {
            return false;
        }
        if let Some(since) = self.since {
            if tx.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if tx.created_at >= until {
                return false;
            }
        }
        true
    }
}

/// One page of history, restartable from `next_cursor`.
#[derive(Debug, Clone)]
pub struct TransactionPage {
    pub transactions: Vec<ReputationTransaction>,
    /// Pass back as the cursor to resume after the last returned entry;
    /// `None` when the history is exhausted.
    pub next_cursor: Option<u64>,
}
