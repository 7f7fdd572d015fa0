//! State Repository - Aggregate reputation persistence
//!
//! The aggregate table is a durable cache of what the ledger already
//! determines: it is upserted after every applied transaction and read
//! back on an in-memory miss (process restart).

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

use crate::aggregate::{ReputationCounters, UserReputationState};

pub struct StateRepository {
    pool: PgPool,
}

impl StateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger.reputation_state (
                user_id BIGINT PRIMARY KEY,
                raw_total BIGINT NOT NULL DEFAULT 0,
                by_category JSONB NOT NULL DEFAULT '{}',
                counters JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create reputation_state table: {}", e))?;

        Ok(())
    }

    pub async fn upsert(&self, state: &UserReputationState) -> Result<(), String> {
        let by_category = serde_json::to_value(&state.by_category)
            .map_err(|e| format!("Failed to serialize category subtotals: {}", e))?;
        let counters = serde_json::to_value(state.counters)
            .map_err(|e| format!("Failed to serialize counters: {}", e))?;

        sqlx::query(
            r#"
            INSERT INTO ledger.reputation_state
                (user_id, raw_total, by_category, counters, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                raw_total = EXCLUDED.raw_total,
                by_category = EXCLUDED.by_category,
                counters = EXCLUDED.counters,
                updated_at = EXCLUDED.updated_at
        "#,
        )
        .bind(state.user_id as i64)
        .bind(state.raw_total)
        .bind(by_category)
        .bind(counters)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to upsert reputation state: {}", e))?;

        debug!(user_id = state.user_id, "Persisted reputation state");
        Ok(())
    }

    pub async fn fetch(&self, user_id: u64) -> Result<Option<UserReputationState>, String> {
        let row = sqlx::query(
            r#"
            SELECT user_id, raw_total, by_category, counters, created_at, updated_at
            FROM ledger.reputation_state
            WHERE user_id = $1
        "#,
        )
        .bind(user_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to fetch reputation state: {}", e))?;

        match row {
            Some(row) => {
                let user_id: i64 = row.get("user_id");
                let by_category: serde_json::Value = row.get("by_category");
                let counters: serde_json::Value = row.get("counters");
                let created_at: DateTime<Utc> = row.get("created_at");
                let updated_at: DateTime<Utc> = row.get("updated_at");

                let by_category = serde_json::from_value(by_category)
                    .map_err(|e| format!("Corrupt category subtotals: {}", e))?;
                let counters: ReputationCounters = serde_json::from_value(counters)
                    .map_err(|e| format!("Corrupt counters: {}", e))?;

                Ok(Some(UserReputationState {
                    user_id: user_id as u64,
                    raw_total: row.get("raw_total"),
                    by_category,
                    counters,
                    created_at,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }
}
