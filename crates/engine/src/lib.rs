//! Engine layer for Manifold
//!
//! Ties the lower layers together into the public database surface:
//! - Table: the non-transactional CRUD surface over committed state
//! - Transaction: the multi-table coordinator running two-phase commit
//! - Database: table registry and transaction factory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod database;
pub mod table;

pub use coordinator::Transaction;
pub use database::Database;
pub use table::Table;
