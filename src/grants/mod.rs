//! Scoped Privilege Grants
//!
//! Time-bound, hierarchically scoped permission records gated by the
//! holder's reputation at issue time. Grant lifecycle:
//! active -> expired | revoked | superseded.

pub mod grant;
pub mod store;

pub use grant::{GrantStatus, IssueRequest, PrivilegeGrant, PrivilegeType, Scope, ScopeKind};
pub use store::GrantStore;
