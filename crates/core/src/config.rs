//! Configuration types: isolation levels, timeouts, table definitions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lock-acquisition timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Isolation level of a transaction
///
/// The level decides which lock mode reads of committed records take;
/// writes always take exclusive locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Reads take shared locks; concurrent readers are allowed
    #[default]
    #[serde(alias = "RepeatableRead")]
    ReadLatest,
    /// Reads take exclusive locks; readers exclude each other
    #[serde(alias = "StrictLocking")]
    Serializable,
}

impl IsolationLevel {
    /// Alias spelling of [`IsolationLevel::ReadLatest`]
    pub const REPEATABLE_READ: IsolationLevel = IsolationLevel::ReadLatest;
    /// Alias spelling of [`IsolationLevel::Serializable`]
    pub const STRICT_LOCKING: IsolationLevel = IsolationLevel::Serializable;
}

/// Database-wide defaults for transactions and base-table waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Default isolation level for transactions
    pub isolation_level: IsolationLevel,
    /// Default lock-acquisition and read-wait timeout, in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            isolation_level: IsolationLevel::default(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    /// Lock timeout as a [`Duration`]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Per-transaction configuration
///
/// Defaults are inherited from the database configuration; individual
/// transactions may override either field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Isolation level of this transaction
    pub isolation_level: IsolationLevel,
    /// Lock-acquisition timeout for this transaction, in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        DatabaseConfig::default().into()
    }
}

impl From<DatabaseConfig> for TransactionConfig {
    fn from(c: DatabaseConfig) -> Self {
        TransactionConfig {
            isolation_level: c.isolation_level,
            lock_timeout_ms: c.lock_timeout_ms,
        }
    }
}

impl TransactionConfig {
    /// Lock timeout as a [`Duration`]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Schema definition of one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDefinition {
    /// Ordered primary-key fields; empty means the implicit `_id` key
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    /// Definition with the given primary-key fields
    pub fn with_primary_key<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TableDefinition {
            primary_key: fields.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = DatabaseConfig::default();
        assert_eq!(c.isolation_level, IsolationLevel::ReadLatest);
        assert_eq!(c.lock_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_isolation_alias_constants() {
        assert_eq!(IsolationLevel::REPEATABLE_READ, IsolationLevel::ReadLatest);
        assert_eq!(IsolationLevel::STRICT_LOCKING, IsolationLevel::Serializable);
    }

    #[test]
    fn test_isolation_serde_aliases() {
        let level: IsolationLevel = serde_json::from_str("\"RepeatableRead\"").unwrap();
        assert_eq!(level, IsolationLevel::ReadLatest);
        let level: IsolationLevel = serde_json::from_str("\"StrictLocking\"").unwrap();
        assert_eq!(level, IsolationLevel::Serializable);
    }

    #[test]
    fn test_table_definition_from_json() {
        let def: TableDefinition =
            serde_json::from_value(serde_json::json!({"primary_key": ["year", "semester"]}))
                .unwrap();
        assert_eq!(def.primary_key, vec!["year", "semester"]);

        let def: TableDefinition = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(def.primary_key.is_empty());
    }

    #[test]
    fn test_transaction_config_inherits_database_defaults() {
        let db = DatabaseConfig {
            isolation_level: IsolationLevel::Serializable,
            lock_timeout_ms: 50,
        };
        let tx: TransactionConfig = db.into();
        assert_eq!(tx.isolation_level, IsolationLevel::Serializable);
        assert_eq!(tx.lock_timeout_ms, 50);
    }
}
