//! Concurrency layer for Manifold
//!
//! This crate implements lock-based transaction isolation:
//! - RecordLockManager: per-key shared/exclusive locks with timed acquisition
//! - TempStore: per-transaction buffer of uncommitted inserts/updates/deletes
//! - TransactionTable: the transactional CRUD surface and 2PC participant
//!
//! Isolation is single-version: committed records carry an optimistic version
//! token, reads take shared or exclusive locks depending on the isolation
//! level, and commit runs prepare (lock + validate) before apply.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod temp;
pub mod transaction;

pub use lock::{Acquisition, LockMode, RecordLockManager, TxnId};
pub use temp::{DeleteOutcome, TempStore};
pub use transaction::TransactionTable;
