//! Ledger Store
//!
//! In-memory authoritative log keyed by sequential surrogate id, with the
//! same prepare/commit split the engine needs to keep the optional database
//! write inside the atomic boundary: `prepare_*` validates and builds the
//! record without mutating anything, `commit_*` applies it. The engine
//! serializes both phases for one user under its per-user lock.

use crate::catalog::ActionCatalog;
use crate::error::{EngineError, Result};
use crate::ledger::transaction::{
    RelatedEntity, ReputationTransaction, ReversalRecord, TransactionFilter, TransactionPage,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Input for a new ledger append.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub user_id: u64,
    pub action_type: String,
    /// Explicit signed delta; falls back to the catalog default when `None`
    pub delta: Option<i64>,
    /// Classification tag; falls back to the catalog default when `None`
    pub category: Option<String>,
    pub related_entity: Option<RelatedEntity>,
    pub triggered_by: Option<u64>,
}

pub struct LedgerStore {
    catalog: Arc<ActionCatalog>,
    transactions: RwLock<BTreeMap<u64, ReputationTransaction>>,
    reversals: RwLock<Vec<ReversalRecord>>,
    next_transaction_id: AtomicU64,
    next_reversal_id: AtomicU64,
}

impl LedgerStore {
    pub fn new(catalog: Arc<ActionCatalog>) -> Self {
        Self {
            catalog,
            transactions: RwLock::new(BTreeMap::new()),
            reversals: RwLock::new(Vec::new()),
            next_transaction_id: AtomicU64::new(1),
            next_reversal_id: AtomicU64::new(1),
        }
    }

    /// Validate an append and build the transaction record without
    /// committing it. Rejects zero deltas and unregistered action types.
    pub fn prepare(&self, request: AppendRequest, now: DateTime<Utc>) -> Result<ReputationTransaction> {
        let definition = self.catalog.get(&request.action_type)?;

        let delta = request.delta.unwrap_or(definition.default_delta);
        if delta == 0 {
            return Err(EngineError::InvalidDelta);
        }

        let category = request.category.or_else(|| definition.category.clone());
        let id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);

        Ok(ReputationTransaction {
            id,
            user_id: request.user_id,
            action_type: request.action_type,
            reputation_change: delta,
            category,
            related_entity: request.related_entity,
            triggered_by: request.triggered_by,
            is_validated: true,
            is_reversed: false,
            reversed_by: None,
            reversal_reason: None,
            created_at: now,
        })
    }

    /// Durably record a prepared transaction.
    pub async fn commit(&self, tx: ReputationTransaction) {
        info!(
            transaction_id = tx.id,
            user_id = tx.user_id,
            action_type = %tx.action_type,
            delta = tx.reputation_change,
            "Ledger append"
        );
        self.transactions.write().await.insert(tx.id, tx);
    }

    /// Validate and convenience-commit in one call (no database involved).
    pub async fn append(&self, request: AppendRequest, now: DateTime<Utc>) -> Result<ReputationTransaction> {
        let tx = self.prepare(request, now)?;
        self.commit(tx.clone()).await;
        Ok(tx)
    }

    /// Validate a reversal and build the linked record. Fails with
    /// `TransactionNotFound` or `AlreadyReversed`; a reversal record itself
    /// can never be reversed (corrections require a new forward entry).
    pub async fn prepare_reversal(
        &self,
        transaction_id: u64,
        reversed_by: u64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(ReversalRecord, ReputationTransaction)> {
        let transactions = self.transactions.read().await;
        let original = transactions
            .get(&transaction_id)
            .ok_or(EngineError::TransactionNotFound(transaction_id))?;
        if original.is_reversed {
            return Err(EngineError::AlreadyReversed(transaction_id));
        }

        let record = ReversalRecord {
            id: self.next_reversal_id.fetch_add(1, Ordering::SeqCst),
            transaction_id,
            user_id: original.user_id,
            reversed_by,
            reason: reason.to_string(),
            created_at: now,
        };
        Ok((record, original.clone()))
    }

    /// Flag the original transaction and append the reversal record.
    pub async fn commit_reversal(&self, record: ReversalRecord) -> Result<()> {
        {
            let mut transactions = self.transactions.write().await;
            let original = transactions
                .get_mut(&record.transaction_id)
                .ok_or(EngineError::TransactionNotFound(record.transaction_id))?;
            original.is_reversed = true;
            original.reversed_by = Some(record.reversed_by);
            original.reversal_reason = Some(record.reason.clone());
        }

        info!(
            reversal_id = record.id,
            transaction_id = record.transaction_id,
            reversed_by = record.reversed_by,
            "Ledger reversal"
        );
        self.reversals.write().await.push(record);
        Ok(())
    }

    /// Resume the id sequences past the highest persisted ids after a
    /// restart, so new appends never collide with durable rows.
    pub fn restore_ids(&self, max_transaction_id: u64, max_reversal_id: u64) {
        self.next_transaction_id
            .fetch_max(max_transaction_id + 1, Ordering::SeqCst);
        self.next_reversal_id
            .fetch_max(max_reversal_id + 1, Ordering::SeqCst);
    }

    pub async fn get(&self, transaction_id: u64) -> Option<ReputationTransaction> {
        self.transactions.read().await.get(&transaction_id).cloned()
    }

    /// Paginated read-only history for one user, ordered by creation
    /// (ascending id), restartable from a cursor.
    pub async fn history(
        &self,
        user_id: u64,
        filter: &TransactionFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> TransactionPage {
        let transactions = self.transactions.read().await;
        let start = cursor.map(|c| c + 1).unwrap_or(0);

        let mut page = Vec::with_capacity(limit.min(64));
        let mut next_cursor = None;
        for tx in transactions.range(start..).map(|(_, tx)| tx) {
            if tx.user_id != user_id || !filter.matches(tx) {
                continue;
            }
            if page.len() == limit {
                next_cursor = page.last().map(|t: &ReputationTransaction| t.id);
                break;
            }
            page.push(tx.clone());
        }

        TransactionPage {
            transactions: page,
            next_cursor,
        }
    }

    /// Signed sum of non-reversed deltas, for invariant checks and audit.
    pub async fn live_sum(&self, user_id: u64) -> i64 {
        self.transactions
            .read()
            .await
            .values()
            .filter(|tx| tx.user_id == user_id)
            .map(|tx| tx.live_delta())
            .sum()
    }

    pub async fn reversals_for(&self, user_id: u64) -> Vec<ReversalRecord> {
        self.reversals
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CounterKind;
    use crate::catalog::ActionDefinition;

    fn test_catalog() -> Arc<ActionCatalog> {
        let mut catalog = ActionCatalog::new();
        catalog.register(
            "answer_accepted",
            ActionDefinition {
                default_delta: 15,
                category: Some("contribution".to_string()),
                counter: Some(CounterKind::AcceptedSolutions),
            },
        );
        catalog.register(
            "spam_detected",
            ActionDefinition {
                default_delta: -100,
                category: Some("penalty".to_string()),
                counter: None,
            },
        );
        Arc::new(catalog)
    }

    fn append_request(user_id: u64, action: &str, delta: Option<i64>) -> AppendRequest {
        AppendRequest {
            user_id,
            action_type: action.to_string(),
            delta,
            category: None,
            related_entity: None,
            triggered_by: None,
        }
    }

    #[tokio::test]
    async fn test_append_uses_catalog_defaults() {
        let store = LedgerStore::new(test_catalog());
        let tx = store
            .append(append_request(1, "answer_accepted", None), Utc::now())
            .await
            .unwrap();

        assert_eq!(tx.reputation_change, 15);
        assert_eq!(tx.category.as_deref(), Some("contribution"));
        assert_eq!(tx.id, 1);
    }

    #[tokio::test]
    async fn test_append_rejects_bad_input() {
        let store = LedgerStore::new(test_catalog());

        let err = store
            .append(append_request(1, "answer_accepted", Some(0)), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDelta));

        let err = store
            .append(append_request(1, "not_registered", Some(5)), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownActionType(_)));
    }

    #[tokio::test]
    async fn test_reversal_flags_original_once() {
        let store = LedgerStore::new(test_catalog());
        let tx = store
            .append(append_request(1, "spam_detected", None), Utc::now())
            .await
            .unwrap();

        let (record, original) = store
            .prepare_reversal(tx.id, 99, "false positive", Utc::now())
            .await
            .unwrap();
        assert_eq!(original.reputation_change, -100);
        store.commit_reversal(record).await.unwrap();

        let stored = store.get(tx.id).await.unwrap();
        assert!(stored.is_reversed);
        assert_eq!(stored.reversed_by, Some(99));
        // Original delta retained for audit
        assert_eq!(stored.reputation_change, -100);
        assert_eq!(stored.live_delta(), 0);

        let err = store
            .prepare_reversal(tx.id, 99, "again", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyReversed(_)));
    }

    #[tokio::test]
    async fn test_history_pagination_restartable() {
        let store = LedgerStore::new(test_catalog());
        for _ in 0..5 {
            store
                .append(append_request(1, "answer_accepted", None), Utc::now())
                .await
                .unwrap();
        }
        // Interleave another user's entries
        store
            .append(append_request(2, "answer_accepted", None), Utc::now())
            .await
            .unwrap();

        let filter = TransactionFilter::default();
        let first = store.history(1, &filter, None, 2).await;
        assert_eq!(first.transactions.len(), 2);
        let cursor = first.next_cursor.unwrap();

        let second = store.history(1, &filter, Some(cursor), 10).await;
        assert_eq!(second.transactions.len(), 3);
        assert!(second.next_cursor.is_none());

        // Ascending order across pages
        let ids: Vec<u64> = first
            .transactions
            .iter()
            .chain(second.transactions.iter())
            .map(|t| t.id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_restore_ids_resumes_sequences() {
        let store = LedgerStore::new(test_catalog());
        store.restore_ids(41, 6);

        let tx = store
            .append(append_request(1, "answer_accepted", None), Utc::now())
            .await
            .unwrap();
        assert_eq!(tx.id, 42);

        let (record, _) = store
            .prepare_reversal(tx.id, 9, "appeal", Utc::now())
            .await
            .unwrap();
        assert_eq!(record.id, 7);
    }

    #[tokio::test]
    async fn test_live_sum_excludes_reversed() {
        let store = LedgerStore::new(test_catalog());
        let keep = store
            .append(append_request(1, "answer_accepted", None), Utc::now())
            .await
            .unwrap();
        let spam = store
            .append(append_request(1, "spam_detected", None), Utc::now())
            .await
            .unwrap();
        assert_eq!(store.live_sum(1).await, -85);

        let (record, _) = store
            .prepare_reversal(spam.id, 9, "appeal upheld", Utc::now())
            .await
            .unwrap();
        store.commit_reversal(record).await.unwrap();
        assert_eq!(store.live_sum(1).await, keep.reputation_change);
    }
}
