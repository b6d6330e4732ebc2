//! Core types for Manifold
//!
//! This crate defines the vocabulary shared by every layer of the database:
//! - Value: unified enum for record field values
//! - Record: field-name → value mapping with merge semantics
//! - PrimaryKey: single/composite primary-key construction and re-keying
//! - Filter: predicate compiler and matcher for `select`/`update`
//! - Error: unified error type for all Manifold APIs
//! - Configuration: isolation levels and lock timeouts

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod filter;
pub mod oid;
pub mod pk;
pub mod record;
pub mod value;

pub use config::{DatabaseConfig, IsolationLevel, TableDefinition, TransactionConfig};
pub use error::{Error, Result};
pub use filter::CompiledFilter;
pub use pk::PrimaryKey;
pub use record::Record;
pub use value::Value;
