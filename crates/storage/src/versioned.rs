//! Versioned records
//!
//! Every committed record carries a monotonically increasing version. The
//! version is the optimistic-concurrency token: transactions snapshot it on
//! first touch and validate it at commit time.

use manifold_core::Record;
use serde::{Deserialize, Serialize};

/// Version assigned to freshly inserted records
pub const INITIAL_VERSION: u64 = 1;

/// A record together with its version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// The record data
    pub data: Record,
    /// Monotonically increasing version, starting at [`INITIAL_VERSION`]
    pub version: u64,
}

impl VersionedRecord {
    /// Wrap freshly inserted data at the initial version
    pub fn new(data: Record) -> Self {
        VersionedRecord {
            data,
            version: INITIAL_VERSION,
        }
    }

    /// Wrap data at a specific version
    pub fn with_version(data: Record, version: u64) -> Self {
        VersionedRecord { data, version }
    }

    /// The same data at the next version
    pub fn bumped(&self) -> Self {
        VersionedRecord {
            data: self.data.clone(),
            version: self.version + 1,
        }
    }
}
