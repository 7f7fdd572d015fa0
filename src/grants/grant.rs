//! Grant Types and Scopes

use crate::catalog::LimitQuota;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Privilege families the grant system recognizes. The fine-grained
/// capabilities within each family come from the privilege catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeType {
    Posting,
    Voting,
    Moderation,
    Verification,
    Administration,
    ContentCreation,
    ExpertAnswers,
    ProjectApproval,
}

impl PrivilegeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeType::Posting => "posting",
            PrivilegeType::Voting => "voting",
            PrivilegeType::Moderation => "moderation",
            PrivilegeType::Verification => "verification",
            PrivilegeType::Administration => "administration",
            PrivilegeType::ContentCreation => "content_creation",
            PrivilegeType::ExpertAnswers => "expert_answers",
            PrivilegeType::ProjectApproval => "project_approval",
        }
    }

    /// Inverse of `as_str`, for decoding persisted rows.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "posting" => Some(PrivilegeType::Posting),
            "voting" => Some(PrivilegeType::Voting),
            "moderation" => Some(PrivilegeType::Moderation),
            "verification" => Some(PrivilegeType::Verification),
            "administration" => Some(PrivilegeType::Administration),
            "content_creation" => Some(PrivilegeType::ContentCreation),
            "expert_answers" => Some(PrivilegeType::ExpertAnswers),
            "project_approval" => Some(PrivilegeType::ProjectApproval),
            _ => None,
        }
    }

    /// Moderation-class privileges may reverse ledger entries and revoke
    /// grants within their scope.
    pub fn is_moderation_class(&self) -> bool {
        matches!(
            self,
            PrivilegeType::Moderation | PrivilegeType::Administration
        )
    }
}

impl fmt::Display for PrivilegeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Topic,
    Cooperative,
    Project,
    Region,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Global => "global",
            ScopeKind::Topic => "topic",
            ScopeKind::Cooperative => "cooperative",
            ScopeKind::Project => "project",
            ScopeKind::Region => "region",
        }
    }

    /// Inverse of `as_str`, for decoding persisted rows.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(ScopeKind::Global),
            "topic" => Some(ScopeKind::Topic),
            "cooperative" => Some(ScopeKind::Cooperative),
            "project" => Some(ScopeKind::Project),
            "region" => Some(ScopeKind::Region),
            _ => None,
        }
    }
}

/// Breadth at which a grant applies: everywhere, or one specific entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Scope {
    Global,
    Topic(u64),
    Cooperative(u64),
    Project(u64),
    Region(u64),
}

impl Scope {
    /// Build from the external (kind, optional id) representation,
    /// rejecting a missing or superfluous scope id.
    pub fn new(kind: ScopeKind, scope_id: Option<u64>) -> Result<Self> {
        match (kind, scope_id) {
            (ScopeKind::Global, None) => Ok(Scope::Global),
            (ScopeKind::Global, Some(_)) => {
                Err(EngineError::UnexpectedScopeId(kind.as_str().to_string()))
            }
            (_, None) => Err(EngineError::MissingScopeId(kind.as_str().to_string())),
            (ScopeKind::Topic, Some(id)) => Ok(Scope::Topic(id)),
            (ScopeKind::Cooperative, Some(id)) => Ok(Scope::Cooperative(id)),
            (ScopeKind::Project, Some(id)) => Ok(Scope::Project(id)),
            (ScopeKind::Region, Some(id)) => Ok(Scope::Region(id)),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Global => ScopeKind::Global,
            Scope::Topic(_) => ScopeKind::Topic,
            Scope::Cooperative(_) => ScopeKind::Cooperative,
            Scope::Project(_) => ScopeKind::Project,
            Scope::Region(_) => ScopeKind::Region,
        }
    }

    pub fn scope_id(&self) -> Option<u64> {
        match self {
            Scope::Global => None,
            Scope::Topic(id)
            | Scope::Cooperative(id)
            | Scope::Project(id)
            | Scope::Region(id) => Some(*id),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    /// Whether a grant at this scope applies to `target`. Global covers
    /// everything; a specific scope covers only its exact entity. The
    /// engine only widens via an explicit global grant, never narrows.
    pub fn covers(&self, target: &Scope) -> bool {
        match self {
            Scope::Global => true,
            specific => specific == target,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope_id() {
            Some(id) => write!(f, "{}:{}", self.kind().as_str(), id),
            None => f.write_str(self.kind().as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Expired,
    Revoked,
    Superseded,
}

/// A privilege grant as stored. Permissions and limits are populated from
/// the catalog at issue time; `reputation_required` is the issue-time
/// snapshot of the threshold that was met (no retroactive re-check).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegeGrant {
    pub id: u64,
    pub user_id: u64,
    pub privilege_type: PrivilegeType,
    pub scope: Scope,
    /// 1-5; higher subsumes lower within the same type and scope
    pub level: u8,
    pub status: GrantStatus,
    pub permissions: BTreeSet<String>,
    pub limits: BTreeMap<String, LimitQuota>,
    pub reputation_required: i64,
    pub granted_at: DateTime<Utc>,
    /// `None` means permanent
    pub expires_at: Option<DateTime<Utc>>,
    /// May equal `user_id` for self-qualifying auto-grants
    pub granted_by: u64,
    pub reason: Option<String>,
    pub revoked_by: Option<u64>,
    pub revoke_reason: Option<String>,
    /// Id of the replacement grant after a supersede
    pub superseded_by: Option<u64>,
}

impl PrivilegeGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Valid for authorization: active status and not past expiry. Expiry
    /// is checked lazily here regardless of sweep cadence.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && !self.is_expired(now)
    }

    pub fn has_permission(&self, capability: &str) -> bool {
        self.permissions.contains(capability)
    }
}

/// Caller input for issuing a grant.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub user_id: u64,
    pub privilege_type: PrivilegeType,
    pub scope: Scope,
    pub level: u8,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: u64,
    pub reason: Option<String>,
}
