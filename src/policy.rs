//! Policy Evaluator
//!
//! Resolves the most specific applicable grant for an authorization check
//! and produces an allow/deny decision plus remaining quota. Pure over a
//! snapshot of grant-store and rate-limiter state: same inputs, same
//! decision. A denial is a normal result value, not an error.
//!
//! Selection order for competing grants: highest level first, then most
//! specific scope (non-global beats global), then most recently granted.

use crate::grants::{GrantStore, PrivilegeGrant, PrivilegeType, Scope};
use crate::limiter::RateLimiter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No active grant covers the target scope
    NoGrant,
    /// A covering grant exists but its named quota is exhausted
    LimitExceeded,
}

/// Authorization decision handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum Decision {
    Allowed {
        grant_id: u64,
        level: u8,
        /// Remaining quota for the requested limit; `None` when no limit
        /// name was supplied or the grant does not configure it
        remaining_quota: Option<u64>,
    },
    Denied {
        reason: DenyReason,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn grant_id(&self) -> Option<u64> {
        match self {
            Decision::Allowed { grant_id, .. } => Some(*grant_id),
            Decision::Denied { .. } => None,
        }
    }

    fn denied(reason: DenyReason) -> Self {
        Decision::Denied { reason }
    }
}

pub struct PolicyEvaluator {
    grants: Arc<GrantStore>,
    limiter: Arc<RateLimiter>,
}

impl PolicyEvaluator {
    pub fn new(grants: Arc<GrantStore>, limiter: Arc<RateLimiter>) -> Self {
        Self { grants, limiter }
    }

    /// Resolve whether `user_id` may exercise `privilege_type` against
    /// `target`. The quota check (when `limit_name` is supplied) is a
    /// non-consuming peek; callers spend quota separately.
    pub async fn authorize(
        &self,
        user_id: u64,
        privilege_type: PrivilegeType,
        target: &Scope,
        limit_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Decision {
        let candidates = self.grants.live_grants(user_id, privilege_type, now).await;
        let selected = Self::select(candidates, target);

        let grant = match selected {
            Some(grant) => grant,
            None => {
                debug!(
                    user_id,
                    privilege_type = %privilege_type,
                    target = %target,
                    "Authorization denied: no covering grant"
                );
                return Decision::denied(DenyReason::NoGrant);
            }
        };

        let remaining_quota = match limit_name {
            Some(name) => match self.limiter.peek(&grant, name, now) {
                Some(0) => {
                    debug!(
                        user_id,
                        grant_id = grant.id,
                        limit_name = name,
                        "Authorization denied: limit exceeded"
                    );
                    return Decision::denied(DenyReason::LimitExceeded);
                }
                remaining => remaining,
            },
            None => None,
        };

        Decision::Allowed {
            grant_id: grant.id,
            level: grant.level,
            remaining_quota,
        }
    }

    /// Filter to covering grants, then pick by level, specificity, recency.
    fn select(candidates: Vec<PrivilegeGrant>, target: &Scope) -> Option<PrivilegeGrant> {
        candidates
            .into_iter()
            .filter(|g| g.scope.covers(target))
            .max_by_key(|g| (g.level, !g.scope.is_global(), g.granted_at))
    }
}
