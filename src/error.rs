//! Engine Error Taxonomy
//!
//! Callers need to distinguish validation bugs from business-rule conflicts
//! from transient storage failures, so every fallible operation returns a
//! typed `EngineError`. Only `Store` errors are safe to retry; everything
//! else surfaces to the caller unchanged. A `Denied` authorization decision
//! is a normal result value, never an error (see `policy::Decision`).

use thiserror::Error;

/// Broad error classes for propagation policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the caller (zero delta, unknown catalog entry, ...)
    Validation,
    /// A legitimate business rule rejected the operation
    Conflict,
    /// The acting user lacks the rights to perform the operation
    Authorization,
    /// Referenced id does not exist
    NotFound,
    /// A rate limit denied the consumption
    Quota,
    /// Underlying store unavailable - retryable with backoff
    Transient,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("reputation delta must be non-zero")]
    InvalidDelta,

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("no catalog entry for privilege {privilege_type} level {level}")]
    UnknownPrivilege { privilege_type: String, level: u8 },

    #[error("privilege level must be between 1 and 5, got {0}")]
    InvalidLevel(u8),

    #[error("scope kind {0} requires a scope id")]
    MissingScopeId(String),

    #[error("scope kind {0} does not take a scope id")]
    UnexpectedScopeId(String),

    #[error("grant {grant_id} has no limit named {limit_name}")]
    UnknownLimit { grant_id: u64, limit_name: String },

    #[error("user {user_id} already holds an active {privilege_type} grant for this scope (grant {existing})")]
    DuplicateActiveGrant {
        user_id: u64,
        privilege_type: String,
        existing: u64,
    },

    #[error("transaction {0} is already reversed")]
    AlreadyReversed(u64),

    #[error("grant {0} is not active")]
    GrantNotActive(u64),

    #[error("user {user_id} has reputation {actual}, {required} required")]
    InsufficientReputation {
        user_id: u64,
        required: i64,
        actual: i64,
    },

    #[error("actor {actor_id} is not authorized to {action}")]
    Unauthorized { actor_id: u64, action: String },

    #[error("transaction {0} not found")]
    TransactionNotFound(u64),

    #[error("grant {0} not found")]
    GrantNotFound(u64),

    #[error("quota {limit_name} exhausted for grant {grant_id}")]
    QuotaExceeded { grant_id: u64, limit_name: String },

    #[error("storage unavailable: {0}")]
    Store(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidDelta
            | EngineError::UnknownActionType(_)
            | EngineError::UnknownPrivilege { .. }
            | EngineError::InvalidLevel(_)
            | EngineError::MissingScopeId(_)
            | EngineError::UnexpectedScopeId(_)
            | EngineError::UnknownLimit { .. } => ErrorKind::Validation,

            EngineError::DuplicateActiveGrant { .. }
            | EngineError::AlreadyReversed(_)
            | EngineError::GrantNotActive(_)
            | EngineError::InsufficientReputation { .. } => ErrorKind::Conflict,

            EngineError::Unauthorized { .. } => ErrorKind::Authorization,

            EngineError::TransactionNotFound(_) | EngineError::GrantNotFound(_) => {
                ErrorKind::NotFound
            }

            EngineError::QuotaExceeded { .. } => ErrorKind::Quota,

            EngineError::Store(_) => ErrorKind::Transient,
        }
    }

    /// Transient store failures may be retried with backoff; nothing else.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn store(msg: impl Into<String>) -> Self {
        EngineError::Store(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(EngineError::InvalidDelta.kind(), ErrorKind::Validation);
        assert_eq!(
            EngineError::AlreadyReversed(7).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            EngineError::GrantNotFound(1).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::Store("connection refused".into()).kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_only_store_errors_retryable() {
        assert!(EngineError::store("timeout").is_retryable());
        assert!(!EngineError::InvalidDelta.is_retryable());
        assert!(!EngineError::TransactionNotFound(3).is_retryable());
    }
}
