//! # ManifoldDB
//!
//! An embedded, in-memory, multi-table transactional store — typed records,
//! composite primary keys, predicate queries, and multi-table transactions
//! coordinated by two-phase commit.
//!
//! Records are field-name → value maps with a declared primary key (single,
//! composite, or an implicit generated `_id`). Transactions buffer their
//! writes privately, take shared or exclusive record locks depending on the
//! isolation level, and validate optimistic version snapshots at commit.
//! There is no durability layer: state lives and dies with the process.
//!
//! # Quick Start
//!
//! ```no_run
//! use manifolddb::{Database, Record, TableDefinition};
//!
//! fn main() -> manifolddb::Result<()> {
//!     let db = Database::new(
//!         [("products", TableDefinition::with_primary_key(["id"]))],
//!         None,
//!     )?;
//!
//!     // Non-transactional writes commit immediately
//!     let products = db.get("products")?;
//!     products.insert(Record::from([("id", 1)]).with("name", "Laptop").with("price", 1500))?;
//!
//!     // Transactions buffer writes and commit atomically
//!     db.transaction(|txn| {
//!         let products = txn.get("products")?;
//!         products.update(
//!             &Record::from([("price", 1100)]),
//!             &serde_json::json!({"id": {"$eq": 1}}),
//!         )?;
//!         products.insert(Record::from([("id", 2)]).with("name", "Tablet"))?;
//!         Ok(())
//!     })?;
//!
//!     assert_eq!(products.size(), 2);
//!     Ok(())
//! }
//! ```
//!
//! # Filters
//!
//! `select` and `update` take a JSON predicate tree: leaf operators `$eq`,
//! `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$like` and the
//! combinators `$and`, `$or`, `$not` (the `$` prefix is optional). A bare
//! value is equality sugar, a bare object is an implicit `and`, and the
//! empty filter matches everything.
//!
//! # Isolation
//!
//! [`IsolationLevel::ReadLatest`] (alias `RepeatableRead`) takes shared
//! locks on reads; [`IsolationLevel::Serializable`] (alias `StrictLocking`)
//! takes exclusive locks on reads. Writes always lock exclusively. Deadlocks
//! resolve through per-request timeouts.

pub use manifold_concurrency::TransactionTable;
pub use manifold_core::{
    CompiledFilter, DatabaseConfig, Error, IsolationLevel, Record, Result, TableDefinition,
    TransactionConfig, Value,
};
pub use manifold_engine::{Database, Table, Transaction};
