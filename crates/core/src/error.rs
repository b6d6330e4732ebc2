//! Error types for the Manifold database
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Categories
//!
//! - **Schema**: bad table or primary-key definitions
//! - **Key**: missing or duplicate primary-key values
//! - **Locking**: lock acquisition timeouts
//! - **Transaction**: conflicts, external modification, use-after-completion
//! - **Query**: invalid filter expressions

use thiserror::Error;

/// Result type alias for Manifold operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Manifold database
#[derive(Debug, Error)]
pub enum Error {
    /// The requested table is not part of the database definition
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A field appears more than once in a primary-key definition
    #[error("duplicate field in primary key definition: {0}")]
    DuplicatePrimaryKeyDefinition(String),

    /// A primary-key component is null, empty, or missing from the record
    #[error("primary key component {0:?} is null or missing")]
    PrimaryKeyValueNull(String),

    /// A record with the same primary key already exists
    #[error("duplicate primary key value: {0}")]
    DuplicatePrimaryKeyValue(String),

    /// A lock could not be acquired within the configured timeout
    #[error("timed out after {timeout_ms}ms waiting for lock on key {key:?}")]
    LockTimeout {
        /// Primary key the lock was requested for
        key: String,
        /// Timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// A committed record changed (or vanished) outside the transaction
    ///
    /// Raised during validate/apply when the committed version no longer
    /// matches the version snapshotted at first touch.
    #[error("record {pk:?} modified outside the transaction: expected version {expected}, found {actual:?}")]
    ExternalModification {
        /// Primary key of the record at the time it was first touched
        pk: String,
        /// Version snapshotted when the transaction first touched the record
        expected: u64,
        /// Version currently committed, or `None` if the record is gone
        actual: Option<u64>,
    },

    /// Operation attempted on a committed or rolled-back transaction
    #[error("transaction {0} is already completed")]
    TransactionCompleted(u64),

    /// A transaction failed to commit
    ///
    /// Wraps the underlying failure (duplicate key, lock timeout, external
    /// modification). The whole coordinator has been rolled back by the time
    /// this error surfaces.
    #[error("transaction {transaction_id} aborted: {source}")]
    TransactionConflict {
        /// Identifier of the aborted transaction
        transaction_id: u64,
        /// Underlying failure that aborted the commit
        #[source]
        source: Box<Error>,
    },

    /// A filter expression could not be compiled
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A value could not be represented as a record field
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl Error {
    /// Wrap a commit-path failure as a `TransactionConflict`
    ///
    /// Already-wrapped conflicts pass through unchanged so a coordinator
    /// re-surfacing a participant failure does not double-wrap it.
    pub fn into_conflict(self, transaction_id: u64) -> Error {
        match self {
            e @ Error::TransactionConflict { .. } => e,
            e => Error::TransactionConflict {
                transaction_id,
                source: Box::new(e),
            },
        }
    }

    /// Check if this error is a transaction conflict
    ///
    /// Used for retry logic - only conflict errors should be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::TransactionConflict { .. })
    }

    /// Check if this error is a lock timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    /// Check if this error marks a completed transaction being reused
    pub fn is_completed(&self) -> bool {
        matches!(self, Error::TransactionCompleted(_))
    }
}
