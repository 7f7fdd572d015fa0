//! Grant Repository - Privilege grant persistence
//!
//! Permissions and limits are stored as JSONB snapshots of what the
//! catalog produced at issue time, so a row is self-contained for audit
//! even if the catalog changes later.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;

use crate::grants::{GrantStatus, PrivilegeGrant, PrivilegeType, Scope, ScopeKind};

pub struct GrantRepository {
    pool: PgPool,
}

impl GrantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grants.privilege_grants (
                id BIGINT PRIMARY KEY,
                user_id BIGINT NOT NULL,
                privilege_type VARCHAR(50) NOT NULL,
                scope_kind VARCHAR(50) NOT NULL,
                scope_id BIGINT,
                level SMALLINT NOT NULL,
                status VARCHAR(20) NOT NULL,
                permissions JSONB NOT NULL,
                limits JSONB NOT NULL,
                reputation_required BIGINT NOT NULL,
                granted_at TIMESTAMP WITH TIME ZONE NOT NULL,
                expires_at TIMESTAMP WITH TIME ZONE,
                granted_by BIGINT NOT NULL,
                reason TEXT,
                revoked_by BIGINT,
                revoke_reason TEXT,
                superseded_by BIGINT
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create privilege_grants table: {}", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_grants_user ON grants.privilege_grants(user_id, privilege_type, status)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create grants index: {}", e))?;

        Ok(())
    }

    pub async fn insert(&self, grant: &PrivilegeGrant) -> Result<(), String> {
        self.upsert_with(&self.pool, grant).await?;
        debug!(grant_id = grant.id, "Persisted grant");
        Ok(())
    }

    /// Mirror a status or reversal-metadata change.
    pub async fn update(&self, grant: &PrivilegeGrant) -> Result<(), String> {
        self.upsert_with(&self.pool, grant).await
    }

    /// Supersede old and insert new atomically: both rows land in one
    /// database transaction or neither does.
    pub async fn supersede(
        &self,
        old: &PrivilegeGrant,
        new: &PrivilegeGrant,
    ) -> Result<(), String> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| format!("Failed to begin supersede transaction: {}", e))?;

        self.upsert_with(&mut *db_tx, old).await?;
        self.upsert_with(&mut *db_tx, new).await?;

        db_tx
            .commit()
            .await
            .map_err(|e| format!("Failed to commit supersede: {}", e))?;

        debug!(old_grant_id = old.id, new_grant_id = new.id, "Persisted supersede");
        Ok(())
    }

    /// Batch-expire rows past their expiry; mirrors the in-memory sweep
    /// and is equally idempotent.
    pub async fn expire_before(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, String> {
        let result = sqlx::query(
            r#"
            UPDATE grants.privilege_grants
            SET status = 'expired'
            WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1
        "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to expire grants: {}", e))?;

        Ok(result.rows_affected())
    }

    /// All persisted grant rows, for restoring the in-memory store after
    /// a restart.
    pub async fn fetch_all(&self) -> Result<Vec<PrivilegeGrant>, String> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, privilege_type, scope_kind, scope_id, level, status,
                   permissions, limits, reputation_required, granted_at, expires_at,
                   granted_by, reason, revoked_by, revoke_reason, superseded_by
            FROM grants.privilege_grants
            ORDER BY id ASC
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to fetch grants: {}", e))?;

        rows.iter().map(decode_grant).collect()
    }

    async fn upsert_with<'e, E>(&self, executor: E, grant: &PrivilegeGrant) -> Result<(), String>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let permissions = serde_json::to_value(&grant.permissions)
            .map_err(|e| format!("Failed to serialize permissions: {}", e))?;
        let limits = serde_json::to_value(&grant.limits)
            .map_err(|e| format!("Failed to serialize limits: {}", e))?;

        sqlx::query(
            r#"
            INSERT INTO grants.privilege_grants
                (id, user_id, privilege_type, scope_kind, scope_id, level, status,
                 permissions, limits, reputation_required, granted_at, expires_at,
                 granted_by, reason, revoked_by, revoke_reason, superseded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                revoked_by = EXCLUDED.revoked_by,
                revoke_reason = EXCLUDED.revoke_reason,
                superseded_by = EXCLUDED.superseded_by
        "#,
        )
        .bind(grant.id as i64)
        .bind(grant.user_id as i64)
        .bind(grant.privilege_type.as_str())
        .bind(grant.scope.kind().as_str())
        .bind(grant.scope.scope_id().map(|id| id as i64))
        .bind(grant.level as i16)
        .bind(status_str(grant.status))
        .bind(permissions)
        .bind(limits)
        .bind(grant.reputation_required)
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .bind(grant.granted_by as i64)
        .bind(&grant.reason)
        .bind(grant.revoked_by.map(|id| id as i64))
        .bind(&grant.revoke_reason)
        .bind(grant.superseded_by.map(|id| id as i64))
        .execute(executor)
        .await
        .map_err(|e| format!("Failed to upsert grant: {}", e))?;

        Ok(())
    }
}

fn decode_grant(row: &PgRow) -> Result<PrivilegeGrant, String> {
    let type_text: String = row.get("privilege_type");
    let privilege_type = PrivilegeType::parse(&type_text)
        .ok_or_else(|| format!("Corrupt privilege type: {}", type_text))?;

    let kind_text: String = row.get("scope_kind");
    let kind = ScopeKind::parse(&kind_text)
        .ok_or_else(|| format!("Corrupt scope kind: {}", kind_text))?;
    let scope_id: Option<i64> = row.get("scope_id");
    let scope = Scope::new(kind, scope_id.map(|id| id as u64))
        .map_err(|e| format!("Corrupt scope: {}", e))?;

    let status_text: String = row.get("status");
    let status = parse_status(&status_text)?;

    let permissions = serde_json::from_value(row.get("permissions"))
        .map_err(|e| format!("Corrupt permissions: {}", e))?;
    let limits = serde_json::from_value(row.get("limits"))
        .map_err(|e| format!("Corrupt limits: {}", e))?;

    let id: i64 = row.get("id");
    let user_id: i64 = row.get("user_id");
    let level: i16 = row.get("level");
    let granted_at: DateTime<Utc> = row.get("granted_at");
    let expires_at: Option<DateTime<Utc>> = row.get("expires_at");
    let granted_by: i64 = row.get("granted_by");
    let revoked_by: Option<i64> = row.get("revoked_by");
    let superseded_by: Option<i64> = row.get("superseded_by");

    Ok(PrivilegeGrant {
        id: id as u64,
        user_id: user_id as u64,
        privilege_type,
        scope,
        level: level as u8,
        status,
        permissions,
        limits,
        reputation_required: row.get("reputation_required"),
        granted_at,
        expires_at,
        granted_by: granted_by as u64,
        reason: row.get("reason"),
        revoked_by: revoked_by.map(|id| id as u64),
        revoke_reason: row.get("revoke_reason"),
        superseded_by: superseded_by.map(|id| id as u64),
    })
}

fn status_str(status: GrantStatus) -> &'static str {
    match status {
        GrantStatus::Active => "active",
        GrantStatus::Expired => "expired",
        GrantStatus::Revoked => "revoked",
        GrantStatus::Superseded => "superseded",
    }
}

fn parse_status(s: &str) -> Result<GrantStatus, String> {
    match s {
        "active" => Ok(GrantStatus::Active),
        "expired" => Ok(GrantStatus::Expired),
        "revoked" => Ok(GrantStatus::Revoked),
        "superseded" => Ok(GrantStatus::Superseded),
        other => Err(format!("Corrupt grant status: {}", other)),
    }
}
