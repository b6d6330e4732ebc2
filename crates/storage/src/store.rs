//! The committed store of one table
//!
//! A `TableStore` is the authoritative PK → versioned-record map. It is owned
//! by the base table and shared by reference (cheap clone of an `Arc`) with
//! every transaction table bound to the same table. Mutations happen through
//! base-table operations outside transactions and through the apply phase of
//! a committing transaction, which holds exclusive record locks on every key
//! it touches.

use crate::versioned::VersionedRecord;
use manifold_core::{Error, Record, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared handle to the committed map of one table
///
/// Individual accessors take the internal lock briefly; validate/apply paths
/// that must observe and mutate atomically use [`TableStore::read`] and
/// [`TableStore::write`] to hold a guard across the whole pass.
#[derive(Debug, Clone, Default)]
pub struct TableStore {
    inner: Arc<RwLock<BTreeMap<String, VersionedRecord>>>,
}

impl TableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the versioned record under `pk`
    pub fn get(&self, pk: &str) -> Option<VersionedRecord> {
        self.inner.read().get(pk).cloned()
    }

    /// Copy of the record data under `pk`
    pub fn get_data(&self, pk: &str) -> Option<Record> {
        self.inner.read().get(pk).map(|vr| vr.data.clone())
    }

    /// Committed version of `pk`, if present
    pub fn version_of(&self, pk: &str) -> Option<u64> {
        self.inner.read().get(pk).map(|vr| vr.version)
    }

    /// Whether `pk` is committed
    pub fn contains(&self, pk: &str) -> bool {
        self.inner.read().contains_key(pk)
    }

    /// Number of committed records
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the table has no committed records
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot of the committed keys in map order
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Insert or replace the record under `pk`
    pub fn put(&self, pk: String, record: VersionedRecord) {
        self.inner.write().insert(pk, record);
    }

    /// Insert `record` under `pk` only if the key is free
    ///
    /// # Errors
    /// Fails with [`Error::DuplicatePrimaryKeyValue`] when `pk` is taken.
    pub fn insert_new(&self, pk: String, record: VersionedRecord) -> Result<()> {
        let mut map = self.inner.write();
        if map.contains_key(&pk) {
            return Err(Error::DuplicatePrimaryKeyValue(pk));
        }
        map.insert(pk, record);
        Ok(())
    }

    /// Remove and return the record under `pk`
    pub fn remove(&self, pk: &str) -> Option<VersionedRecord> {
        self.inner.write().remove(pk)
    }

    /// Drop every committed record
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Read guard over the whole committed map
    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, VersionedRecord>> {
        self.inner.read()
    }

    /// Write guard over the whole committed map
    pub fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, VersionedRecord>> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vr(json: serde_json::Value) -> VersionedRecord {
        VersionedRecord::new(Record::from_json(&json).unwrap())
    }

    #[test]
    fn test_insert_new_rejects_duplicates() {
        let store = TableStore::new();
        store
            .insert_new("1".into(), vr(serde_json::json!({"id": 1})))
            .unwrap();
        let err = store
            .insert_new("1".into(), vr(serde_json::json!({"id": 1})))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePrimaryKeyValue(pk) if pk == "1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_returns_copy() {
        let store = TableStore::new();
        store
            .insert_new("1".into(), vr(serde_json::json!({"id": 1, "n": 5})))
            .unwrap();
        let mut copy = store.get_data("1").unwrap();
        copy.set("n", 99);
        assert_eq!(
            store.get_data("1").unwrap().get("n"),
            Some(&manifold_core::Value::Int(5))
        );
    }

    #[test]
    fn test_keys_in_map_order() {
        let store = TableStore::new();
        for pk in ["b", "a", "c"] {
            store
                .insert_new(pk.into(), vr(serde_json::json!({"id": pk})))
                .unwrap();
        }
        assert_eq!(store.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_shared_handles_view_same_map() {
        let store = TableStore::new();
        let alias = store.clone();
        store
            .insert_new("1".into(), vr(serde_json::json!({"id": 1})))
            .unwrap();
        assert!(alias.contains("1"));
        alias.clear();
        assert!(store.is_empty());
    }
}
