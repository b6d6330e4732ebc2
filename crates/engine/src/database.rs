//! Database facade: table registry and transaction factory
//!
//! A `Database` is built once from a schema (table name → primary-key
//! definition) and hands out table handles and transactions. There is no
//! persistence: every table lives purely in memory.

use crate::coordinator::Transaction;
use crate::table::Table;
use manifold_core::{DatabaseConfig, Error, Result, TableDefinition, TransactionConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// An in-memory multi-table database
///
/// Cheap to clone; clones share the same tables.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

#[derive(Debug)]
struct DbInner {
    tables: Arc<HashMap<String, Table>>,
    config: DatabaseConfig,
    next_txn: AtomicU64,
}

impl Database {
    /// Build a database from a schema
    ///
    /// `definitions` maps table name to its [`TableDefinition`]; `options`
    /// falls back to [`DatabaseConfig::default`] (read-latest isolation,
    /// 5000 ms lock timeout).
    ///
    /// # Errors
    /// Fails with [`Error::DuplicatePrimaryKeyDefinition`] when any table
    /// repeats a field in its primary key.
    pub fn new<I, S>(definitions: I, options: Option<DatabaseConfig>) -> Result<Self>
    where
        I: IntoIterator<Item = (S, TableDefinition)>,
        S: Into<String>,
    {
        let config = options.unwrap_or_default();
        let mut tables = HashMap::new();
        for (name, definition) in definitions {
            let name = name.into();
            let table = Table::create(name.clone(), &definition, config)?;
            tables.insert(name, table);
        }
        info!(tables = tables.len(), "database ready");
        Ok(Database {
            inner: Arc::new(DbInner {
                tables: Arc::new(tables),
                config,
                next_txn: AtomicU64::new(1),
            }),
        })
    }

    /// Handle to the named table
    ///
    /// # Errors
    /// Fails with [`Error::TableNotFound`] for names outside the schema.
    pub fn get(&self, table: &str) -> Result<Table> {
        self.inner
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    /// Names of every table in the schema
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a transaction
    ///
    /// `options` falls back to the database configuration.
    pub fn create_transaction(&self, options: Option<TransactionConfig>) -> Transaction {
        let id = self.inner.next_txn.fetch_add(1, Ordering::SeqCst);
        let config = options.unwrap_or_else(|| self.inner.config.into());
        Transaction::new(id, config, Arc::clone(&self.inner.tables))
    }

    /// Run `callback` inside a transaction
    ///
    /// Commits when the callback returns `Ok`, rolls back and propagates the
    /// error when it returns `Err`.
    pub fn transaction<T, F>(&self, callback: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        self.transaction_with(None, callback)
    }

    /// Run `callback` inside a transaction with explicit options
    pub fn transaction_with<T, F>(&self, options: Option<TransactionConfig>, callback: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let txn = self.create_transaction(options);
        match callback(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = txn.rollback();
                Err(e)
            }
        }
    }

    /// Clear every table's committed state
    ///
    /// In-flight transactions keep their buffers and fail naturally at
    /// commit time with an external-modification conflict.
    pub fn reset(&self) {
        for table in self.inner.tables.values() {
            table.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::Record;
    use serde_json::json;

    fn rec(json: serde_json::Value) -> Record {
        Record::from_json(&json).unwrap()
    }

    fn db() -> Database {
        Database::new(
            [
                ("products", TableDefinition::with_primary_key(["id"])),
                ("users", TableDefinition::default()),
            ],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_get_known_and_unknown_tables() {
        let db = db();
        assert!(db.get("products").is_ok());
        let err = db.get("missing").unwrap_err();
        assert!(matches!(err, Error::TableNotFound(name) if name == "missing"));
        assert_eq!(db.table_names(), vec!["products", "users"]);
    }

    #[test]
    fn test_duplicate_pk_definition_fails_construction() {
        let err = Database::new(
            [("bad", TableDefinition::with_primary_key(["a", "a"]))],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicatePrimaryKeyDefinition(_)));
    }

    #[test]
    fn test_transaction_callback_commits_on_ok() {
        let db = db();
        db.transaction(|txn| {
            let products = txn.get("products")?;
            products.insert(rec(json!({"id": 1, "name": "a"})))?;
            Ok(())
        })
        .unwrap();

        let products = db.get("products").unwrap();
        assert_eq!(products.size(), 1);
    }

    #[test]
    fn test_transaction_callback_rolls_back_on_err() {
        let db = db();
        let result: Result<()> = db.transaction(|txn| {
            let products = txn.get("products")?;
            products.insert(rec(json!({"id": 1})))?;
            Err(Error::InvalidValue("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.get("products").unwrap().size(), 0);
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let db = db();
        let a = db.create_transaction(None);
        let b = db.create_transaction(None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_reset_clears_all_tables() {
        let db = db();
        db.get("products")
            .unwrap()
            .insert(rec(json!({"id": 1})))
            .unwrap();
        db.reset();
        assert_eq!(db.get("products").unwrap().size(), 0);
    }

    #[test]
    fn test_transaction_get_unknown_table() {
        let db = db();
        let txn = db.create_transaction(None);
        assert!(matches!(
            txn.get("missing").unwrap_err(),
            Error::TableNotFound(_)
        ));
        txn.rollback().unwrap();
        assert!(txn.get("products").unwrap_err().is_completed());
    }
}
