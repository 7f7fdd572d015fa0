//! PostgreSQL Persistence
//!
//! Write-through durability for the in-memory authoritative state: two
//! append-mostly tables (transactions, grants), one mutable aggregate table
//! (per-user reputation state). Rate counters are derived and are not
//! persisted. All rows are keyed by surrogate integer ids with references
//! by id, never embedded object graphs.

pub mod grants;
pub mod pool;
pub mod reputation;
pub mod transactions;

pub use grants::GrantRepository;
pub use pool::DatabasePool;
pub use reputation::StateRepository;
pub use transactions::TransactionRepository;
