//! Per-Grant Rate Limiter
//!
//! Fixed-window counters keyed by (grant id, limit name). Window
//! boundaries are deterministic functions of the injected clock (UTC
//! minute/hour/day floor), so a counter resets exactly at the boundary no
//! matter which caller observes it first. Only the per-key entry is locked
//! during a consume; there is no broader lock.
//!
//! `consume` spends quota; `peek` is the dry-run used by policy
//! evaluation so an authorization check never consumes.

use crate::catalog::LimitQuota;
use crate::error::{EngineError, Result};
use crate::grants::PrivilegeGrant;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Outcome of a consume attempt. Remaining never goes negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_start: DateTime<Utc>,
    consumed: u64,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: DashMap<(u64, String), WindowCounter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically consume `amount` from the named quota of a grant.
    /// Denied (without partial consumption) when the window's remainder is
    /// smaller than `amount`.
    pub fn consume(
        &self,
        grant: &PrivilegeGrant,
        limit_name: &str,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let quota = self.quota(grant, limit_name)?;
        let key = (grant.id, limit_name.to_string());

        let mut entry = self.counters.entry(key).or_insert(WindowCounter {
            window_start: quota.window.floor(now),
            consumed: 0,
        });
        let counter = entry.value_mut();
        Self::roll_window(counter, &quota, now);

        let remaining = quota.max.saturating_sub(counter.consumed);
        if amount > remaining {
            debug!(
                grant_id = grant.id,
                limit_name,
                consumed = counter.consumed,
                max = quota.max,
                "Quota denied"
            );
            return Ok(ConsumeOutcome {
                allowed: false,
                remaining,
            });
        }

        counter.consumed += amount;
        Ok(ConsumeOutcome {
            allowed: true,
            remaining: remaining - amount,
        })
    }

    /// Remaining quota without consuming. `None` when the grant does not
    /// configure the named limit (unlimited for that grant).
    pub fn peek(
        &self,
        grant: &PrivilegeGrant,
        limit_name: &str,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let quota = *grant.limits.get(limit_name)?;
        let remaining = match self.counters.get(&(grant.id, limit_name.to_string())) {
            Some(entry) => {
                let counter = *entry.value();
                if now >= counter.window_start + quota.window.duration() {
                    quota.max
                } else {
                    quota.max.saturating_sub(counter.consumed)
                }
            }
            None => quota.max,
        };
        Some(remaining)
    }

    /// Drop counters whose window ended before `now`. Counters are
    /// recomputable, so eviction cadence does not affect correctness.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        self.counters.retain(|_, counter| {
            // Windows are at most a day long
            now.signed_duration_since(counter.window_start) < chrono::Duration::days(2)
        });
    }

    fn quota(&self, grant: &PrivilegeGrant, limit_name: &str) -> Result<LimitQuota> {
        grant
            .limits
            .get(limit_name)
            .copied()
            .ok_or_else(|| EngineError::UnknownLimit {
                grant_id: grant.id,
                limit_name: limit_name.to_string(),
            })
    }

    fn roll_window(counter: &mut WindowCounter, quota: &LimitQuota, now: DateTime<Utc>) {
        let boundary = quota.window.floor(now);
        if boundary > counter.window_start {
            counter.window_start = boundary;
            counter.consumed = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LimitQuota;
    use crate::grants::{GrantStatus, PrivilegeType, Scope};
    use chrono::TimeZone;

    fn grant_with_limit(id: u64, name: &str, quota: LimitQuota) -> PrivilegeGrant {
        PrivilegeGrant {
            id,
            user_id: 1,
            privilege_type: PrivilegeType::Posting,
            scope: Scope::Global,
            level: 1,
            status: GrantStatus::Active,
            permissions: Default::default(),
            limits: [(name.to_string(), quota)].into(),
            reputation_required: 0,
            granted_at: Utc::now(),
            expires_at: None,
            granted_by: 1,
            reason: None,
            revoked_by: None,
            revoke_reason: None,
            superseded_by: None,
        }
    }

    #[test]
    fn test_consume_grid_three_per_day() {
        let limiter = RateLimiter::new();
        let grant = grant_with_limit(1, "posts_per_day", LimitQuota::per_day(3));
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();

        let outcomes: Vec<ConsumeOutcome> = (0..4)
            .map(|_| limiter.consume(&grant, "posts_per_day", 1, now).unwrap())
            .collect();

        assert!(outcomes[0].allowed && outcomes[1].allowed && outcomes[2].allowed);
        assert_eq!(outcomes[2].remaining, 0);
        assert!(!outcomes[3].allowed);
        assert_eq!(outcomes[3].remaining, 0);
    }

    #[test]
    fn test_window_resets_at_boundary() {
        let limiter = RateLimiter::new();
        let grant = grant_with_limit(1, "posts_per_day", LimitQuota::per_day(2));
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 23, 30, 0).unwrap();

        limiter.consume(&grant, "posts_per_day", 2, now).unwrap();
        assert!(!limiter.consume(&grant, "posts_per_day", 1, now).unwrap().allowed);

        // A minute into the next UTC day the counter is fresh
        let next_day = Utc.with_ymd_and_hms(2025, 6, 2, 0, 1, 0).unwrap();
        let outcome = limiter.consume(&grant, "posts_per_day", 1, next_day).unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 1);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let limiter = RateLimiter::new();
        let grant = grant_with_limit(1, "posts_per_day", LimitQuota::per_day(3));
        let now = Utc::now();

        assert_eq!(limiter.peek(&grant, "posts_per_day", now), Some(3));
        assert_eq!(limiter.peek(&grant, "posts_per_day", now), Some(3));

        limiter.consume(&grant, "posts_per_day", 1, now).unwrap();
        assert_eq!(limiter.peek(&grant, "posts_per_day", now), Some(2));

        // Unconfigured limit reads as unlimited
        assert_eq!(limiter.peek(&grant, "flags_per_day", now), None);
    }

    #[test]
    fn test_oversized_amount_denied_without_partial_spend() {
        let limiter = RateLimiter::new();
        let grant = grant_with_limit(1, "uploads_per_hour", LimitQuota::per_hour(5));
        let now = Utc::now();

        let outcome = limiter.consume(&grant, "uploads_per_hour", 6, now).unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining, 5);
        assert_eq!(limiter.peek(&grant, "uploads_per_hour", now), Some(5));
    }

    #[test]
    fn test_unknown_limit_is_validation_error() {
        let limiter = RateLimiter::new();
        let grant = grant_with_limit(1, "posts_per_day", LimitQuota::per_day(3));
        let err = limiter
            .consume(&grant, "not_configured", 1, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownLimit { .. }));
    }

    #[test]
    fn test_counters_independent_per_grant() {
        let limiter = RateLimiter::new();
        let a = grant_with_limit(1, "posts_per_day", LimitQuota::per_day(1));
        let b = grant_with_limit(2, "posts_per_day", LimitQuota::per_day(1));
        let now = Utc::now();

        assert!(limiter.consume(&a, "posts_per_day", 1, now).unwrap().allowed);
        assert!(!limiter.consume(&a, "posts_per_day", 1, now).unwrap().allowed);
        assert!(limiter.consume(&b, "posts_per_day", 1, now).unwrap().allowed);
    }
}
