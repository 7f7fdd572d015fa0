//! Reputation Engine - Main Orchestrator
//!
//! The external interface collaborating subsystems call: record and
//! reverse reputation events, query aggregates, issue/supersede/revoke
//! grants, and run authorization checks. Wires the ledger, aggregator,
//! grant store, rate limiter, and policy evaluator together and enforces
//! the atomic boundaries between them.
//!
//! Locking discipline: ledger mutations for one user run under that
//! user's keyed lock (ledger append, aggregate update, and the database
//! write form one critical section); grant mutations use the grant
//! store's own per-user locks. Authorization checks are pure reads and
//! take neither, so a revocation's rights check can never deadlock with
//! its own write. Where both lock families are held (auto-grants after an
//! append), the order is always ledger lock before grant lock.

use crate::aggregate::{Aggregator, ReputationSnapshot};
use crate::catalog::{ActionCatalog, PrivilegeCatalog};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::database::DatabasePool;
use crate::error::{EngineError, Result};
use crate::grants::{GrantStore, IssueRequest, PrivilegeGrant, PrivilegeType, Scope, ScopeKind};
use crate::ledger::{AppendRequest, LedgerStore, ReversalRecord, TransactionFilter, TransactionPage};
use crate::limiter::RateLimiter;
use crate::policy::{Decision, PolicyEvaluator};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct ReputationEngine {
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    actions: Arc<ActionCatalog>,
    privileges: Arc<PrivilegeCatalog>,
    ledger: Arc<LedgerStore>,
    aggregator: Arc<Aggregator>,
    grants: Arc<GrantStore>,
    limiter: Arc<RateLimiter>,
    policy: PolicyEvaluator,
    db: Option<Arc<DatabasePool>>,

    /// Serializes ledger mutations per user id
    user_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl ReputationEngine {
    pub fn new(actions: ActionCatalog, privileges: PrivilegeCatalog) -> Self {
        let actions = Arc::new(actions);
        let privileges = Arc::new(privileges);
        let ledger = Arc::new(LedgerStore::new(actions.clone()));
        let grants = Arc::new(GrantStore::new(privileges.clone()));
        let limiter = Arc::new(RateLimiter::new());
        let policy = PolicyEvaluator::new(grants.clone(), limiter.clone());

        Self {
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            actions,
            privileges,
            ledger,
            aggregator: Arc::new(Aggregator::new()),
            grants,
            limiter,
            policy,
            db: None,
            user_locks: DashMap::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach write-through persistence. Must be called before any state
    /// accumulates; the grant store is rebuilt with the pool attached.
    pub fn with_database(mut self, db: Arc<DatabasePool>) -> Self {
        self.grants = Arc::new(
            GrantStore::new(self.privileges.clone()).with_database(db.clone()),
        );
        self.policy = PolicyEvaluator::new(self.grants.clone(), self.limiter.clone());
        self.db = Some(db);
        self
    }

    /// Reload durable state after a process restart: grant rows are loaded
    /// in full and the ledger id sequences resume past the highest
    /// persisted ids. Aggregates rehydrate lazily on read. No-op without
    /// persistence attached.
    pub async fn restore(&self) -> Result<()> {
        if let Some(db) = &self.db {
            let rows = db.grants().fetch_all().await.map_err(EngineError::store)?;
            let loaded = rows.len();
            self.grants.hydrate(rows).await;

            let (max_transaction, max_reversal) = db
                .transactions()
                .max_ids()
                .await
                .map_err(EngineError::store)?;
            self.ledger.restore_ids(max_transaction, max_reversal);

            info!(grants = loaded, "Restored durable state");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ledger interface
    // ------------------------------------------------------------------

    /// Record a reputation event. Ledger append, aggregate update, and the
    /// database write commit together or not at all.
    pub async fn record_event(&self, request: AppendRequest) -> Result<u64> {
        let user_id = request.user_id;
        let now = self.clock.now();

        let lock = self.user_lock(user_id);
        let guard = lock.lock().await;

        let tx = self.ledger.prepare(request, now)?;
        if let Some(db) = &self.db {
            db.transactions()
                .insert(&tx)
                .await
                .map_err(EngineError::store)?;
        }
        self.ledger.commit(tx.clone()).await;

        let counter = self.actions.counter_for(&tx.action_type);
        self.aggregator.apply_forward(&tx, counter, now);
        self.persist_state(user_id).await;

        drop(guard);
        self.evaluate_auto_grants(user_id, now).await;

        Ok(tx.id)
    }

    /// Reverse a committed event. Requires the actor to hold a live
    /// moderation-class grant. The aggregate afterwards reads as if the
    /// original event never happened; the ledger keeps the full record.
    pub async fn reverse_event(
        &self,
        transaction_id: u64,
        actor_id: u64,
        reason: &str,
    ) -> Result<u64> {
        let now = self.clock.now();

        // Rights check is a pure read; no ledger lock is held yet
        if !self.grants.holds_moderation_grant(actor_id, None, now).await {
            return Err(EngineError::Unauthorized {
                actor_id,
                action: "reverse ledger transactions".to_string(),
            });
        }

        let owner = self
            .ledger
            .get(transaction_id)
            .await
            .ok_or(EngineError::TransactionNotFound(transaction_id))?
            .user_id;

        let lock = self.user_lock(owner);
        let _guard = lock.lock().await;

        let (record, original) = self
            .ledger
            .prepare_reversal(transaction_id, actor_id, reason, now)
            .await?;
        if let Some(db) = &self.db {
            db.transactions()
                .apply_reversal(&record)
                .await
                .map_err(EngineError::store)?;
        }
        let reversal_id = record.id;
        self.ledger.commit_reversal(record).await?;

        let counter = self.actions.counter_for(&original.action_type);
        self.aggregator.apply_reversal(&original, counter, now);
        self.persist_state(owner).await;

        Ok(reversal_id)
    }

    /// Current aggregate for a user: floored total, category subtotals,
    /// counters. Falls back to persisted state on an in-memory miss.
    pub async fn get_reputation(&self, user_id: u64) -> Result<ReputationSnapshot> {
        if !self.aggregator.is_initialized(user_id) {
            if let Some(db) = &self.db {
                let lock = self.user_lock(user_id);
                let _guard = lock.lock().await;
                if !self.aggregator.is_initialized(user_id) {
                    if let Some(state) = db
                        .reputation()
                        .fetch(user_id)
                        .await
                        .map_err(EngineError::store)?
                    {
                        self.aggregator.hydrate(state);
                    }
                }
            }
        }
        Ok(self.aggregator.snapshot(user_id))
    }

    /// Paginated transaction history, ascending by creation. When the
    /// in-memory ledger has nothing for the page, falls back to the
    /// durable log (restart case); with write-through persistence the
    /// durable log is a superset of memory.
    pub async fn history(
        &self,
        user_id: u64,
        filter: &TransactionFilter,
        cursor: Option<u64>,
        limit: Option<usize>,
    ) -> Result<TransactionPage> {
        let limit = limit
            .unwrap_or(self.config.ledger.default_page_size)
            .clamp(1, self.config.ledger.max_page_size);
        let page = self.ledger.history(user_id, filter, cursor, limit).await;
        if !page.transactions.is_empty() {
            return Ok(page);
        }
        let db = match &self.db {
            Some(db) => db,
            None => return Ok(page),
        };

        let rows = db
            .transactions()
            .fetch_history(user_id, cursor, limit as i64)
            .await
            .map_err(EngineError::store)?;
        let more = rows.len() == limit;
        let last_id = rows.last().map(|tx| tx.id);
        let transactions: Vec<_> = rows.into_iter().filter(|tx| filter.matches(tx)).collect();
        Ok(TransactionPage {
            transactions,
            next_cursor: if more { last_id } else { None },
        })
    }

    /// Reversal audit records linked to a user's transactions.
    pub async fn list_reversals(&self, user_id: u64) -> Vec<ReversalRecord> {
        self.ledger.reversals_for(user_id).await
    }

    // ------------------------------------------------------------------
    // Grant interface
    // ------------------------------------------------------------------

    /// Issue a grant, gated on the holder's reputation at this moment.
    pub async fn issue_grant(&self, request: IssueRequest) -> Result<PrivilegeGrant> {
        let reputation = self.current_reputation(request.user_id).await?;
        self.grants.issue(request, reputation, self.clock.now()).await
    }

    /// Replace an active grant with a new level/expiry atomically.
    pub async fn supersede_grant(
        &self,
        old_grant_id: u64,
        new_level: u8,
        new_expires_at: Option<DateTime<Utc>>,
        actor_id: u64,
    ) -> Result<PrivilegeGrant> {
        let owner = self
            .grants
            .get(old_grant_id)
            .await
            .ok_or(EngineError::GrantNotFound(old_grant_id))?
            .user_id;
        let reputation = self.current_reputation(owner).await?;
        self.grants
            .supersede(
                old_grant_id,
                new_level,
                new_expires_at,
                actor_id,
                reputation,
                self.clock.now(),
            )
            .await
    }

    /// Revoke a grant. The actor must hold a live moderation-class grant
    /// at equal or broader scope than the target.
    pub async fn revoke_grant(&self, grant_id: u64, actor_id: u64, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let target = self
            .grants
            .get(grant_id)
            .await
            .ok_or(EngineError::GrantNotFound(grant_id))?;

        if !self
            .grants
            .holds_moderation_grant(actor_id, Some(&target.scope), now)
            .await
        {
            return Err(EngineError::Unauthorized {
                actor_id,
                action: format!("revoke grant {}", grant_id),
            });
        }

        self.grants.revoke(grant_id, actor_id, reason, now).await?;
        Ok(())
    }

    /// All grants a user holds, any status.
    pub async fn list_grants(&self, user_id: u64) -> Vec<PrivilegeGrant> {
        self.grants.grants_for(user_id).await
    }

    /// Transition past-expiry active grants. Idempotent; evaluation checks
    /// expiry lazily regardless of sweep cadence.
    pub async fn expire_sweep(&self) -> Result<u64> {
        self.grants.expire_sweep(self.clock.now()).await
    }

    // ------------------------------------------------------------------
    // Authorization interface
    // ------------------------------------------------------------------

    /// Non-consuming authorization check. A denial is a normal result
    /// value; an `Err` means the check itself could not be performed.
    pub async fn authorize(
        &self,
        user_id: u64,
        privilege_type: PrivilegeType,
        scope_kind: ScopeKind,
        scope_id: Option<u64>,
        limit_name: Option<&str>,
    ) -> Result<Decision> {
        let target = Scope::new(scope_kind, scope_id)?;
        Ok(self
            .policy
            .authorize(user_id, privilege_type, &target, limit_name, self.clock.now())
            .await)
    }

    /// Spend quota against a live grant. Denial surfaces as
    /// `QuotaExceeded`; the returned value is the remaining quota.
    pub async fn consume_quota(
        &self,
        grant_id: u64,
        limit_name: &str,
        amount: u64,
    ) -> Result<u64> {
        let now = self.clock.now();
        let grant = self
            .grants
            .get(grant_id)
            .await
            .ok_or(EngineError::GrantNotFound(grant_id))?;
        if !grant.is_live(now) {
            return Err(EngineError::GrantNotActive(grant_id));
        }

        let outcome = self.limiter.consume(&grant, limit_name, amount, now)?;
        if !outcome.allowed {
            return Err(EngineError::QuotaExceeded {
                grant_id,
                limit_name: limit_name.to_string(),
            });
        }
        Ok(outcome.remaining)
    }

    /// Dry-run quota check; `None` means the grant has no such limit.
    pub async fn peek_quota(&self, grant_id: u64, limit_name: &str) -> Result<Option<u64>> {
        let grant = self
            .grants
            .get(grant_id)
            .await
            .ok_or(EngineError::GrantNotFound(grant_id))?;
        Ok(self.limiter.peek(&grant, limit_name, self.clock.now()))
    }

    /// Evict rate counters whose windows are long past.
    pub fn limiter_cleanup(&self) {
        self.limiter.cleanup(self.clock.now());
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    fn user_lock(&self, user_id: u64) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Floored total used for issue-time reputation gates.
    async fn current_reputation(&self, user_id: u64) -> Result<i64> {
        Ok(self.get_reputation(user_id).await?.total as i64)
    }

    /// Mirror the aggregate row. The table is a durable cache of what the
    /// ledger already determines, so a failed mirror is logged and the
    /// row catches up on the next write.
    async fn persist_state(&self, user_id: u64) {
        if let Some(db) = &self.db {
            if let Some(state) = self.aggregator.raw_state(user_id) {
                if let Err(e) = db.reputation().upsert(&state).await {
                    warn!(user_id, error = %e, "Failed to mirror reputation state");
                }
            }
        }
    }

    /// Self-issue global grants whose reputation threshold the user now
    /// meets. Runs after the ledger lock is released; the grant store's
    /// duplicate check makes racing evaluations safe.
    async fn evaluate_auto_grants(&self, user_id: u64, now: DateTime<Utc>) {
        let total = self.aggregator.total(user_id) as i64;

        for rule in self.privileges.auto_grant_rules() {
            if total < rule.min_reputation {
                continue;
            }
            let already_held = self
                .grants
                .live_grants(user_id, rule.privilege_type, now)
                .await
                .iter()
                .any(|g| g.scope.is_global() && g.level >= rule.level);
            if already_held {
                continue;
            }

            let request = IssueRequest {
                user_id,
                privilege_type: rule.privilege_type,
                scope: Scope::Global,
                level: rule.level,
                expires_at: None,
                granted_by: user_id,
                reason: Some("reputation threshold reached".to_string()),
            };
            match self.grants.issue(request, total, now).await {
                Ok(grant) => {
                    info!(
                        user_id,
                        grant_id = grant.id,
                        privilege_type = %grant.privilege_type,
                        level = grant.level,
                        "Auto-issued grant"
                    );
                }
                Err(EngineError::DuplicateActiveGrant { .. }) => {}
                Err(e) => {
                    warn!(user_id, error = %e, "Auto-grant issuance failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CounterKind;
    use crate::catalog::{ActionDefinition, LimitQuota, PrivilegeSpec};
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn catalogs() -> (ActionCatalog, PrivilegeCatalog) {
        let mut actions = ActionCatalog::new();
        actions.register(
            "answer_accepted",
            ActionDefinition {
                default_delta: 15,
                category: Some("contribution".to_string()),
                counter: Some(CounterKind::AcceptedSolutions),
            },
        );
        actions.register(
            "spam_detected",
            ActionDefinition {
                default_delta: -100,
                category: Some("penalty".to_string()),
                counter: None,
            },
        );

        let mut privileges = PrivilegeCatalog::new();
        privileges.register(
            PrivilegeType::Posting,
            1,
            PrivilegeSpec {
                permissions: ["post.create".to_string()].into(),
                limits: [("posts_per_day".to_string(), LimitQuota::per_day(3))].into(),
                min_reputation: 0,
            },
        );
        privileges.register(
            PrivilegeType::Moderation,
            3,
            PrivilegeSpec {
                permissions: ["mod.reverse".to_string()].into(),
                limits: Default::default(),
                min_reputation: 0,
            },
        );
        (actions, privileges)
    }

    fn engine() -> ReputationEngine {
        let (actions, privileges) = catalogs();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        ReputationEngine::new(actions, privileges)
            .with_clock(Arc::new(ManualClock::new(start)))
    }

    fn event(user_id: u64, action: &str) -> AppendRequest {
        AppendRequest {
            user_id,
            action_type: action.to_string(),
            delta: None,
            category: None,
            related_entity: None,
            triggered_by: None,
        }
    }

    async fn grant_moderation(engine: &ReputationEngine, user_id: u64) {
        engine
            .issue_grant(IssueRequest {
                user_id,
                privilege_type: PrivilegeType::Moderation,
                scope: Scope::Global,
                level: 3,
                expires_at: None,
                granted_by: 1,
                reason: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_updates_aggregate_and_counters() {
        let engine = engine();
        engine.record_event(event(1, "answer_accepted")).await.unwrap();

        let snapshot = engine.get_reputation(1).await.unwrap();
        assert_eq!(snapshot.total, 15);
        assert_eq!(snapshot.by_category["contribution"], 15);
        assert_eq!(snapshot.counters.accepted_solutions, 1);
    }

    #[tokio::test]
    async fn test_reverse_requires_moderation_grant() {
        let engine = engine();
        let tx_id = engine.record_event(event(1, "spam_detected")).await.unwrap();

        let err = engine.reverse_event(tx_id, 9, "appeal").await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));

        grant_moderation(&engine, 9).await;
        engine.reverse_event(tx_id, 9, "appeal").await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_quota_maps_denial_to_error() {
        let engine = engine();
        let grant = engine
            .issue_grant(IssueRequest {
                user_id: 1,
                privilege_type: PrivilegeType::Posting,
                scope: Scope::Global,
                level: 1,
                expires_at: None,
                granted_by: 1,
                reason: None,
            })
            .await
            .unwrap();

        assert_eq!(engine.consume_quota(grant.id, "posts_per_day", 3).await.unwrap(), 0);
        let err = engine
            .consume_quota(grant.id, "posts_per_day", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::QuotaExceeded { .. }));
    }
}
