//! Transaction Repository - Ledger persistence
//!
//! The transactions table is append-mostly: the only update ever applied
//! is the reversal flag set, mirrored from the in-memory ledger. Reversal
//! records land in their own table linked by transaction id.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

use crate::ledger::{RelatedEntity, ReputationTransaction, ReversalRecord};

pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger.transactions (
                id BIGINT PRIMARY KEY,
                user_id BIGINT NOT NULL,
                action_type VARCHAR(100) NOT NULL,
                reputation_change BIGINT NOT NULL,
                category VARCHAR(100),
                related_entity_type VARCHAR(100),
                related_entity_id BIGINT,
                triggered_by BIGINT,
                is_validated BOOLEAN NOT NULL DEFAULT TRUE,
                is_reversed BOOLEAN NOT NULL DEFAULT FALSE,
                reversed_by BIGINT,
                reversal_reason TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create transactions table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger.reversals (
                id BIGINT PRIMARY KEY,
                transaction_id BIGINT NOT NULL REFERENCES ledger.transactions(id),
                user_id BIGINT NOT NULL,
                reversed_by BIGINT NOT NULL,
                reason TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create reversals table: {}", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_user ON ledger.transactions(user_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create transactions index: {}", e))?;

        Ok(())
    }

    pub async fn insert(&self, tx: &ReputationTransaction) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO ledger.transactions
                (id, user_id, action_type, reputation_change, category,
                 related_entity_type, related_entity_id, triggered_by,
                 is_validated, is_reversed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
        )
        .bind(tx.id as i64)
        .bind(tx.user_id as i64)
        .bind(&tx.action_type)
        .bind(tx.reputation_change)
        .bind(&tx.category)
        .bind(tx.related_entity.as_ref().map(|e| e.entity_type.as_str()))
        .bind(tx.related_entity.as_ref().map(|e| e.entity_id as i64))
        .bind(tx.triggered_by.map(|id| id as i64))
        .bind(tx.is_validated)
        .bind(tx.is_reversed)
        .bind(tx.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to insert transaction: {}", e))?;

        debug!(transaction_id = tx.id, "Persisted ledger transaction");
        Ok(())
    }

    /// Flag the original row and insert the reversal record in one
    /// database transaction.
    pub async fn apply_reversal(&self, record: &ReversalRecord) -> Result<(), String> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| format!("Failed to begin reversal transaction: {}", e))?;

        sqlx::query(
            r#"
            UPDATE ledger.transactions
            SET is_reversed = TRUE, reversed_by = $2, reversal_reason = $3
            WHERE id = $1
        "#,
        )
        .bind(record.transaction_id as i64)
        .bind(record.reversed_by as i64)
        .bind(&record.reason)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| format!("Failed to flag reversed transaction: {}", e))?;

        sqlx::query(
            r#"
            INSERT INTO ledger.reversals
                (id, transaction_id, user_id, reversed_by, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        "#,
        )
        .bind(record.id as i64)
        .bind(record.transaction_id as i64)
        .bind(record.user_id as i64)
        .bind(record.reversed_by as i64)
        .bind(&record.reason)
        .bind(record.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| format!("Failed to insert reversal record: {}", e))?;

        db_tx
            .commit()
            .await
            .map_err(|e| format!("Failed to commit reversal: {}", e))?;

        debug!(
            reversal_id = record.id,
            transaction_id = record.transaction_id,
            "Persisted reversal"
        );
        Ok(())
    }

    /// Highest persisted transaction and reversal ids, for resuming the
    /// in-memory sequences after a restart.
    pub async fn max_ids(&self) -> Result<(u64, u64), String> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(MAX(id), 0) FROM ledger.transactions) AS max_transaction,
                (SELECT COALESCE(MAX(id), 0) FROM ledger.reversals) AS max_reversal
        "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| format!("Failed to read ledger id bounds: {}", e))?;

        let max_transaction: i64 = row.get("max_transaction");
        let max_reversal: i64 = row.get("max_reversal");
        Ok((max_transaction as u64, max_reversal as u64))
    }

    /// Page of one user's transactions after a cursor, ascending by id.
    pub async fn fetch_history(
        &self,
        user_id: u64,
        after_id: Option<u64>,
        limit: i64,
    ) -> Result<Vec<ReputationTransaction>, String> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, action_type, reputation_change, category,
                   related_entity_type, related_entity_id, triggered_by,
                   is_validated, is_reversed, reversed_by, reversal_reason, created_at
            FROM ledger.transactions
            WHERE user_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
        "#,
        )
        .bind(user_id as i64)
        .bind(after_id.unwrap_or(0) as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to fetch history: {}", e))?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_type: Option<String> = row.get("related_entity_type");
            let entity_id: Option<i64> = row.get("related_entity_id");
            let related_entity = match (entity_type, entity_id) {
                (Some(entity_type), Some(entity_id)) => Some(RelatedEntity {
                    entity_type,
                    entity_id: entity_id as u64,
                }),
                _ => None,
            };

            let id: i64 = row.get("id");
            let user_id: i64 = row.get("user_id");
            let triggered_by: Option<i64> = row.get("triggered_by");
            let reversed_by: Option<i64> = row.get("reversed_by");
            let created_at: DateTime<Utc> = row.get("created_at");

            transactions.push(ReputationTransaction {
                id: id as u64,
                user_id: user_id as u64,
                action_type: row.get("action_type"),
                reputation_change: row.get("reputation_change"),
                category: row.get("category"),
                related_entity,
                triggered_by: triggered_by.map(|id| id as u64),
                is_validated: row.get("is_validated"),
                is_reversed: row.get("is_reversed"),
                reversed_by: reversed_by.map(|id| id as u64),
                reversal_reason: row.get("reversal_reason"),
                created_at,
            });
        }
        Ok(transactions)
    }
}
