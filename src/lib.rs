//! Trust Ledger
//!
//! Reputation ledger and scoped privilege authorization engine for a
//! community platform. Collaborating subsystems emit reputation events
//! into an append-only, reversible ledger; an aggregator maintains each
//! user's trust score; grants gate privileged actions by type, scope,
//! level, and rate limit.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── config.rs      - Configuration management
//! ├── clock.rs       - Injected time source
//! ├── catalog.rs     - Registered action & privilege catalogs
//! ├── error.rs       - Typed error taxonomy
//! ├── ledger/        - Append-only reputation ledger
//! │   ├── transaction.rs - Transaction & reversal records
//! │   └── store.rs       - Ledger store (append, reverse, history)
//! ├── aggregate/     - Per-user reputation aggregation
//! │   ├── state.rs       - Aggregate state & counters
//! │   └── aggregator.rs  - Incremental aggregator
//! ├── grants/        - Scoped privilege grants
//! │   ├── grant.rs       - Grant types, scopes, privilege types
//! │   └── store.rs       - Grant store & lifecycle
//! ├── limiter.rs     - Per-grant fixed-window rate limiter
//! ├── policy.rs      - Policy evaluator (allow/deny decisions)
//! ├── engine.rs      - Engine facade (external interface)
//! └── database/      - PostgreSQL persistence
//! ```

pub mod aggregate;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod grants;
pub mod ledger;
pub mod limiter;
pub mod policy;

// Re-export main types for convenience
pub use aggregate::{
    Aggregator, CounterKind, ReputationCounters, ReputationSnapshot, UserReputationState,
};
pub use catalog::{
    ActionCatalog, ActionDefinition, AutoGrantRule, LimitQuota, LimitWindow, PrivilegeCatalog,
    PrivilegeSpec,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use database::DatabasePool;
pub use engine::ReputationEngine;
pub use error::{EngineError, ErrorKind};
pub use grants::{
    GrantStatus, GrantStore, IssueRequest, PrivilegeGrant, PrivilegeType, Scope, ScopeKind,
};
pub use ledger::{
    AppendRequest, LedgerStore, RelatedEntity, ReputationTransaction, ReversalRecord,
    TransactionFilter, TransactionPage,
};
pub use limiter::{ConsumeOutcome, RateLimiter};
pub use policy::{Decision, DenyReason, PolicyEvaluator};
