//! Grant Store
//!
//! Authoritative in-memory store of privilege grants with optional
//! write-through PostgreSQL persistence. Issuance, supersede, and
//! revocation for one user are serialized by a per-user keyed lock so the
//! "no duplicate active grant" invariant holds under concurrency; grants
//! for different users proceed without contention. Database writes happen
//! inside the same critical section, before the in-memory commit, so an
//! operation either fully commits or fully fails.

use crate::catalog::PrivilegeCatalog;
use crate::database::DatabasePool;
use crate::error::{EngineError, Result};
use crate::grants::grant::{GrantStatus, IssueRequest, PrivilegeGrant, PrivilegeType, Scope};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub struct GrantStore {
    catalog: Arc<PrivilegeCatalog>,
    db: Option<Arc<DatabasePool>>,
    grants: RwLock<HashMap<u64, PrivilegeGrant>>,
    next_id: AtomicU64,
    /// Serializes grant mutations per user id
    user_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl GrantStore {
    pub fn new(catalog: Arc<PrivilegeCatalog>) -> Self {
        Self {
            catalog,
            db: None,
            grants: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            user_locks: DashMap::new(),
        }
    }

    pub fn with_database(mut self, db: Arc<DatabasePool>) -> Self {
        self.db = Some(db);
        self
    }

    fn user_lock(&self, user_id: u64) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Issue a new grant. Permissions and limits come from the catalog for
    /// the requested level; `current_reputation` is the issue-time snapshot
    /// checked against the catalog threshold.
    pub async fn issue(
        &self,
        request: IssueRequest,
        current_reputation: i64,
        now: DateTime<Utc>,
    ) -> Result<PrivilegeGrant> {
        let spec = self
            .catalog
            .effective_spec(request.privilege_type, request.level)?;
        if current_reputation < spec.min_reputation {
            return Err(EngineError::InsufficientReputation {
                user_id: request.user_id,
                required: spec.min_reputation,
                actual: current_reputation,
            });
        }

        let lock = self.user_lock(request.user_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self
            .find_active(request.user_id, request.privilege_type, &request.scope, now)
            .await
        {
            return Err(EngineError::DuplicateActiveGrant {
                user_id: request.user_id,
                privilege_type: request.privilege_type.as_str().to_string(),
                existing: existing.id,
            });
        }

        let grant = PrivilegeGrant {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: request.user_id,
            privilege_type: request.privilege_type,
            scope: request.scope,
            level: request.level,
            status: GrantStatus::Active,
            permissions: spec.permissions,
            limits: spec.limits,
            reputation_required: spec.min_reputation,
            granted_at: now,
            expires_at: request.expires_at,
            granted_by: request.granted_by,
            reason: request.reason,
            revoked_by: None,
            revoke_reason: None,
            superseded_by: None,
        };

        if let Some(db) = &self.db {
            db.grants().insert(&grant).await.map_err(EngineError::store)?;
        }
        self.grants.write().await.insert(grant.id, grant.clone());

        info!(
            grant_id = grant.id,
            user_id = grant.user_id,
            privilege_type = %grant.privilege_type,
            scope = %grant.scope,
            level = grant.level,
            granted_by = grant.granted_by,
            "Issued privilege grant"
        );
        Ok(grant)
    }

    /// Atomically replace an active grant with a new level/expiry for the
    /// same (user, type, scope). A concurrent reader observes either the
    /// old grant or the new one, never both active and never neither.
    pub async fn supersede(
        &self,
        old_grant_id: u64,
        new_level: u8,
        new_expires_at: Option<DateTime<Utc>>,
        actor_id: u64,
        current_reputation: i64,
        now: DateTime<Utc>,
    ) -> Result<PrivilegeGrant> {
        let old = self
            .get(old_grant_id)
            .await
            .ok_or(EngineError::GrantNotFound(old_grant_id))?;

        let spec = self.catalog.effective_spec(old.privilege_type, new_level)?;
        if current_reputation < spec.min_reputation {
            return Err(EngineError::InsufficientReputation {
                user_id: old.user_id,
                required: spec.min_reputation,
                actual: current_reputation,
            });
        }

        let lock = self.user_lock(old.user_id);
        let _guard = lock.lock().await;

        let mut grants = self.grants.write().await;
        let old = grants
            .get(&old_grant_id)
            .ok_or(EngineError::GrantNotFound(old_grant_id))?;
        if !old.is_live(now) {
            return Err(EngineError::GrantNotActive(old_grant_id));
        }

        let new_grant = PrivilegeGrant {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: old.user_id,
            privilege_type: old.privilege_type,
            scope: old.scope,
            level: new_level,
            status: GrantStatus::Active,
            permissions: spec.permissions,
            limits: spec.limits,
            reputation_required: spec.min_reputation,
            granted_at: now,
            expires_at: new_expires_at,
            granted_by: actor_id,
            reason: old.reason.clone(),
            revoked_by: None,
            revoke_reason: None,
            superseded_by: None,
        };

        let mut old_updated = old.clone();
        old_updated.status = GrantStatus::Superseded;
        old_updated.superseded_by = Some(new_grant.id);

        if let Some(db) = &self.db {
            db.grants()
                .supersede(&old_updated, &new_grant)
                .await
                .map_err(EngineError::store)?;
        }

        // Both transitions land while the write lock is held
        grants.insert(old_grant_id, old_updated);
        grants.insert(new_grant.id, new_grant.clone());

        info!(
            old_grant_id,
            new_grant_id = new_grant.id,
            user_id = new_grant.user_id,
            level = new_grant.level,
            actor_id,
            "Superseded privilege grant"
        );
        Ok(new_grant)
    }

    /// Deactivate a grant. Actor authorization is the engine's concern;
    /// the store only enforces lifecycle validity.
    pub async fn revoke(
        &self,
        grant_id: u64,
        actor_id: u64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PrivilegeGrant> {
        let mut grants = self.grants.write().await;
        let grant = grants
            .get(&grant_id)
            .ok_or(EngineError::GrantNotFound(grant_id))?;
        if !grant.is_live(now) {
            return Err(EngineError::GrantNotActive(grant_id));
        }

        let mut updated = grant.clone();
        updated.status = GrantStatus::Revoked;
        updated.revoked_by = Some(actor_id);
        updated.revoke_reason = Some(reason.to_string());

        if let Some(db) = &self.db {
            db.grants().update(&updated).await.map_err(EngineError::store)?;
        }
        grants.insert(grant_id, updated.clone());

        info!(
            grant_id,
            user_id = updated.user_id,
            actor_id,
            reason,
            "Revoked privilege grant"
        );
        Ok(updated)
    }

    /// Idempotent batch transition of past-expiry active grants. Safe to
    /// run concurrently or repeatedly; evaluation checks expiry lazily
    /// anyway, so this is an optimization, not a correctness dependency.
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut grants = self.grants.write().await;
        let mut expired = 0u64;
        for grant in grants.values_mut() {
            if grant.status == GrantStatus::Active && grant.is_expired(now) {
                grant.status = GrantStatus::Expired;
                expired += 1;
            }
        }
        drop(grants);

        if let Some(db) = &self.db {
            db.grants().expire_before(now).await.map_err(EngineError::store)?;
        }

        if expired > 0 {
            debug!(expired, "Expire sweep transitioned grants");
        }
        Ok(expired)
    }

    /// Seed the store from persisted rows after a restart. Existing
    /// in-memory entries win; the id counter resumes past the highest
    /// persisted id so new grants never collide with durable rows.
    pub async fn hydrate(&self, rows: Vec<PrivilegeGrant>) {
        let mut grants = self.grants.write().await;
        let mut max_id = 0u64;
        for grant in rows {
            max_id = max_id.max(grant.id);
            grants.entry(grant.id).or_insert(grant);
        }
        drop(grants);
        self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
    }

    pub async fn get(&self, grant_id: u64) -> Option<PrivilegeGrant> {
        self.grants.read().await.get(&grant_id).cloned()
    }

    /// All grants a user holds, any status, for audit and display.
    pub async fn grants_for(&self, user_id: u64) -> Vec<PrivilegeGrant> {
        let mut grants: Vec<PrivilegeGrant> = self
            .grants
            .read()
            .await
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.id);
        grants
    }

    /// Live grants of one privilege type for a user (lazy expiry check).
    pub async fn live_grants(
        &self,
        user_id: u64,
        privilege_type: PrivilegeType,
        now: DateTime<Utc>,
    ) -> Vec<PrivilegeGrant> {
        self.grants
            .read()
            .await
            .values()
            .filter(|g| {
                g.user_id == user_id && g.privilege_type == privilege_type && g.is_live(now)
            })
            .cloned()
            .collect()
    }

    /// Whether the actor holds a live moderation-class grant covering
    /// `target_scope` (any scope when `None`). Read-only; never takes the
    /// store's write locks, so authorization checks cannot deadlock with a
    /// concurrent revocation.
    pub async fn holds_moderation_grant(
        &self,
        actor_id: u64,
        target_scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> bool {
        self.grants.read().await.values().any(|g| {
            g.user_id == actor_id
                && g.privilege_type.is_moderation_class()
                && g.is_live(now)
                && target_scope.map(|s| g.scope.covers(s)).unwrap_or(true)
        })
    }

    async fn find_active(
        &self,
        user_id: u64,
        privilege_type: PrivilegeType,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Option<PrivilegeGrant> {
        self.grants
            .read()
            .await
            .values()
            .find(|g| {
                g.user_id == user_id
                    && g.privilege_type == privilege_type
                    && g.scope == *scope
                    && g.is_live(now)
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LimitQuota, PrivilegeSpec};
    use chrono::Duration;

    fn test_catalog() -> Arc<PrivilegeCatalog> {
        let mut catalog = PrivilegeCatalog::new();
        catalog.register(
            PrivilegeType::Posting,
            1,
            PrivilegeSpec {
                permissions: ["post.create".to_string()].into(),
                limits: [("posts_per_day".to_string(), LimitQuota::per_day(3))].into(),
                min_reputation: 0,
            },
        );
        catalog.register(
            PrivilegeType::Posting,
            2,
            PrivilegeSpec {
                permissions: ["post.edit_own".to_string()].into(),
                limits: [("posts_per_day".to_string(), LimitQuota::per_day(10))].into(),
                min_reputation: 50,
            },
        );
        catalog.register(
            PrivilegeType::Moderation,
            3,
            PrivilegeSpec {
                permissions: ["mod.revoke".to_string(), "mod.reverse".to_string()].into(),
                limits: Default::default(),
                min_reputation: 500,
            },
        );
        Arc::new(catalog)
    }

    fn issue_request(user_id: u64, scope: Scope, level: u8) -> IssueRequest {
        IssueRequest {
            user_id,
            privilege_type: PrivilegeType::Posting,
            scope,
            level,
            expires_at: None,
            granted_by: 1000,
            reason: Some("earned".to_string()),
        }
    }

    #[tokio::test]
    async fn test_issue_populates_from_catalog() {
        let store = GrantStore::new(test_catalog());
        let grant = store
            .issue(issue_request(1, Scope::Global, 2), 80, Utc::now())
            .await
            .unwrap();

        assert!(grant.has_permission("post.create"));
        assert!(grant.has_permission("post.edit_own"));
        assert_eq!(grant.limits["posts_per_day"].max, 10);
        assert_eq!(grant.reputation_required, 50);
        assert_eq!(grant.status, GrantStatus::Active);
    }

    #[tokio::test]
    async fn test_issue_reputation_gate() {
        let store = GrantStore::new(test_catalog());
        let err = store
            .issue(issue_request(1, Scope::Global, 2), 49, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientReputation {
                required: 50,
                actual: 49,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_active_grant_rejected() {
        let store = GrantStore::new(test_catalog());
        let now = Utc::now();
        store
            .issue(issue_request(1, Scope::Topic(7), 1), 10, now)
            .await
            .unwrap();

        let err = store
            .issue(issue_request(1, Scope::Topic(7), 1), 10, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateActiveGrant { .. }));

        // A different scope id is a different tuple
        store
            .issue(issue_request(1, Scope::Topic(8), 1), 10, now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_supersede_swaps_atomically() {
        let store = GrantStore::new(test_catalog());
        let now = Utc::now();
        let old = store
            .issue(issue_request(1, Scope::Global, 1), 100, now)
            .await
            .unwrap();

        let new = store
            .supersede(old.id, 2, None, 1000, 100, now)
            .await
            .unwrap();

        let old_after = store.get(old.id).await.unwrap();
        assert_eq!(old_after.status, GrantStatus::Superseded);
        assert_eq!(old_after.superseded_by, Some(new.id));
        assert_eq!(new.level, 2);
        assert!(new.is_live(now));

        // The tuple has exactly one live grant again
        let live = store
            .live_grants(1, PrivilegeType::Posting, now)
            .await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, new.id);
    }

    #[tokio::test]
    async fn test_revoke_then_reissue() {
        let store = GrantStore::new(test_catalog());
        let now = Utc::now();
        let grant = store
            .issue(issue_request(1, Scope::Global, 1), 10, now)
            .await
            .unwrap();

        let revoked = store.revoke(grant.id, 99, "abuse", now).await.unwrap();
        assert_eq!(revoked.status, GrantStatus::Revoked);
        assert_eq!(revoked.revoked_by, Some(99));

        let err = store.revoke(grant.id, 99, "again", now).await.unwrap_err();
        assert!(matches!(err, EngineError::GrantNotActive(_)));

        // Revocation frees the tuple for a fresh issue
        store
            .issue(issue_request(1, Scope::Global, 1), 10, now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expire_sweep_idempotent() {
        let store = GrantStore::new(test_catalog());
        let now = Utc::now();
        let mut request = issue_request(1, Scope::Global, 1);
        request.expires_at = Some(now + Duration::days(1));
        store.issue(request, 10, now).await.unwrap();

        let later = now + Duration::days(2);
        assert_eq!(store.expire_sweep(later).await.unwrap(), 1);
        assert_eq!(store.expire_sweep(later).await.unwrap(), 0);

        assert!(store
            .live_grants(1, PrivilegeType::Posting, later)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_expired_tuple_can_be_reissued_without_sweep() {
        let store = GrantStore::new(test_catalog());
        let now = Utc::now();
        let mut request = issue_request(1, Scope::Global, 1);
        request.expires_at = Some(now + Duration::hours(1));
        store.issue(request, 10, now).await.unwrap();

        // Past expiry the lazy check frees the tuple even without a sweep
        let later = now + Duration::hours(2);
        store
            .issue(issue_request(1, Scope::Global, 1), 10, later)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_hydrate_restores_rows_and_resumes_ids() {
        let store = GrantStore::new(test_catalog());
        let now = Utc::now();

        let persisted = PrivilegeGrant {
            id: 9,
            user_id: 1,
            privilege_type: PrivilegeType::Posting,
            scope: Scope::Global,
            level: 1,
            status: GrantStatus::Active,
            permissions: ["post.create".to_string()].into(),
            limits: [("posts_per_day".to_string(), LimitQuota::per_day(3))].into(),
            reputation_required: 0,
            granted_at: now,
            expires_at: None,
            granted_by: 1000,
            reason: None,
            revoked_by: None,
            revoke_reason: None,
            superseded_by: None,
        };
        store.hydrate(vec![persisted]).await;

        // Restored rows answer reads like any other grant
        let live = store.live_grants(1, PrivilegeType::Posting, now).await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, 9);
        assert!(store.get(9).await.is_some());

        // And participate in the duplicate-active invariant
        let err = store
            .issue(issue_request(1, Scope::Global, 1), 10, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateActiveGrant { .. }));

        // New ids never collide with restored ones
        let fresh = store
            .issue(issue_request(1, Scope::Topic(7), 1), 10, now)
            .await
            .unwrap();
        assert_eq!(fresh.id, 10);
    }

    #[tokio::test]
    async fn test_moderation_grant_scope_covering() {
        let store = GrantStore::new(test_catalog());
        let now = Utc::now();
        store
            .issue(
                IssueRequest {
                    user_id: 9,
                    privilege_type: PrivilegeType::Moderation,
                    scope: Scope::Topic(7),
                    level: 3,
                    expires_at: None,
                    granted_by: 1000,
                    reason: None,
                },
                600,
                now,
            )
            .await
            .unwrap();

        assert!(
            store
                .holds_moderation_grant(9, Some(&Scope::Topic(7)), now)
                .await
        );
        assert!(
            !store
                .holds_moderation_grant(9, Some(&Scope::Topic(8)), now)
                .await
        );
        assert!(store.holds_moderation_grant(9, None, now).await);
        assert!(!store.holds_moderation_grant(1, None, now).await);
    }
}
