//! Registered Catalogs
//!
//! The engine does not hardcode application semantics. Collaborating
//! subsystems register two catalogs up front:
//!
//! - `ActionCatalog`: maps opaque action types to a default reputation
//!   delta, a classification category, and optionally one of the aggregate
//!   counters. `record_event` validates against it.
//! - `PrivilegeCatalog`: maps (privilege type, level) to the capability set,
//!   named quotas, and minimum reputation required at issue time, so issued
//!   grants carry deterministic permissions instead of caller-supplied blobs.
//!
//! Auto-grant rules also live here: when a user's reputation crosses a
//! rule's threshold, the engine self-issues the named global grant.

use crate::aggregate::CounterKind;
use crate::error::{EngineError, Result};
use crate::grants::PrivilegeType;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 5;

/// Fixed window over which a named quota applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
    Minute,
    Hour,
    Day,
}

impl LimitWindow {
    fn seconds(&self) -> i64 {
        match self {
            LimitWindow::Minute => 60,
            LimitWindow::Hour => 3_600,
            LimitWindow::Day => 86_400,
        }
    }

    /// Deterministic window start containing `now` (UTC-aligned).
    pub fn floor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.seconds();
        let ts = now.timestamp();
        let floored = ts - ts.rem_euclid(secs);
        Utc.timestamp_opt(floored, 0).single().unwrap_or(now)
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }
}

/// A named quota carried on a grant, e.g. posts_per_day = 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitQuota {
    pub max: u64,
    pub window: LimitWindow,
}

impl LimitQuota {
    pub fn per_day(max: u64) -> Self {
        Self {
            max,
            window: LimitWindow::Day,
        }
    }

    pub fn per_hour(max: u64) -> Self {
        Self {
            max,
            window: LimitWindow::Hour,
        }
    }

    pub fn per_minute(max: u64) -> Self {
        Self {
            max,
            window: LimitWindow::Minute,
        }
    }
}

/// Registered definition of a reputation-affecting action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Delta applied when the caller does not supply one explicitly
    pub default_delta: i64,
    /// Default classification category for the ledger entry
    pub category: Option<String>,
    /// Aggregate counter this action feeds, if any
    pub counter: Option<CounterKind>,
}

/// Catalog of action types accepted by the ledger.
#[derive(Debug, Default, Clone)]
pub struct ActionCatalog {
    actions: HashMap<String, ActionDefinition>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action_type: impl Into<String>, definition: ActionDefinition) {
        self.actions.insert(action_type.into(), definition);
    }

    pub fn get(&self, action_type: &str) -> Result<&ActionDefinition> {
        self.actions
            .get(action_type)
            .ok_or_else(|| EngineError::UnknownActionType(action_type.to_string()))
    }

    pub fn counter_for(&self, action_type: &str) -> Option<CounterKind> {
        self.actions.get(action_type).and_then(|d| d.counter)
    }
}

/// Capabilities and quotas registered for one (privilege type, level) pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivilegeSpec {
    /// Fine-grained capability strings unlocked at this level
    pub permissions: BTreeSet<String>,
    /// Named quotas introduced or overridden at this level
    pub limits: BTreeMap<String, LimitQuota>,
    /// Minimum total reputation required to be issued this level
    pub min_reputation: i64,
}

/// Self-qualifying grant issued when reputation crosses a threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoGrantRule {
    pub privilege_type: PrivilegeType,
    pub level: u8,
    pub min_reputation: i64,
}

/// Catalog mapping (privilege type, level) to permission sets and limits.
///
/// Levels are monotonic: the effective spec for level L is the union of the
/// registered specs for levels 1..=L, with higher levels overriding quota
/// values for limits of the same name.
#[derive(Debug, Default, Clone)]
pub struct PrivilegeCatalog {
    specs: HashMap<(PrivilegeType, u8), PrivilegeSpec>,
    auto_grants: Vec<AutoGrantRule>,
}

impl PrivilegeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, privilege_type: PrivilegeType, level: u8, spec: PrivilegeSpec) {
        self.specs.insert((privilege_type, level), spec);
    }

    pub fn register_auto_grant(&mut self, rule: AutoGrantRule) {
        self.auto_grants.push(rule);
    }

    pub fn auto_grant_rules(&self) -> &[AutoGrantRule] {
        &self.auto_grants
    }

    /// Effective permissions, limits, and reputation threshold for a level,
    /// folding in everything the lower levels already granted.
    pub fn effective_spec(&self, privilege_type: PrivilegeType, level: u8) -> Result<PrivilegeSpec> {
        if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            return Err(EngineError::InvalidLevel(level));
        }
        if !self.specs.contains_key(&(privilege_type, level)) {
            return Err(EngineError::UnknownPrivilege {
                privilege_type: privilege_type.as_str().to_string(),
                level,
            });
        }

        let mut effective = PrivilegeSpec::default();
        for l in MIN_LEVEL..=level {
            if let Some(spec) = self.specs.get(&(privilege_type, l)) {
                effective
                    .permissions
                    .extend(spec.permissions.iter().cloned());
                for (name, quota) in &spec.limits {
                    effective.limits.insert(name.clone(), *quota);
                }
                effective.min_reputation = spec.min_reputation;
            }
        }
        Ok(effective)
    }
}
