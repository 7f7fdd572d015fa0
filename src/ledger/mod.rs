//! Append-Only Reputation Ledger
//!
//! Durable log of reputation transactions. Entries are immutable once
//! committed; the only permitted mutation is an explicit reversal, which
//! flags the original entry and links a reversal record while preserving
//! the full audit trail.

pub mod store;
pub mod transaction;

pub use store::{AppendRequest, LedgerStore};
pub use transaction::{
    RelatedEntity, ReputationTransaction, ReversalRecord, TransactionFilter, TransactionPage,
};
