//! Non-transactional table surface
//!
//! A `Table` operates directly on the committed store. It takes no record
//! locks of its own; reads and destructive operations wait (bounded by the
//! configured lock timeout) for foreign exclusive locks to clear, while
//! shared locks held by transactions do not block base operations. That
//! asymmetry is what lets a base-table write surface as an external
//! modification when a concurrent transaction later validates its snapshot.

use manifold_concurrency::{RecordLockManager, TransactionTable, TxnId};
use manifold_core::{
    CompiledFilter, DatabaseConfig, PrimaryKey, Record, Result, TableDefinition, TransactionConfig,
};
use manifold_storage::{TableStore, VersionedRecord};
use std::sync::Arc;

/// Handle to one table's committed state
///
/// Cheap to clone; clones share the committed store and lock manager.
#[derive(Debug, Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

#[derive(Debug)]
struct TableInner {
    name: String,
    store: TableStore,
    locks: Arc<RecordLockManager>,
    pk: Arc<PrimaryKey>,
    config: DatabaseConfig,
}

impl Table {
    /// Build a table from its definition
    ///
    /// # Errors
    /// Fails with [`manifold_core::Error::DuplicatePrimaryKeyDefinition`]
    /// when the primary-key definition repeats a field.
    pub(crate) fn create(
        name: impl Into<String>,
        definition: &TableDefinition,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let pk = PrimaryKey::new(definition.primary_key.clone())?;
        Ok(Table {
            inner: Arc::new(TableInner {
                name: name.into(),
                store: TableStore::new(),
                locks: Arc::new(RecordLockManager::new()),
                pk: Arc::new(pk),
                config,
            }),
        })
    }

    /// Name of this table
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of committed records
    pub fn size(&self) -> usize {
        self.inner.store.len()
    }

    /// Insert a record into committed state
    ///
    /// For default-keyed tables a missing `_id` is generated. Returns a copy
    /// of the stored data.
    ///
    /// # Errors
    /// Fails with [`manifold_core::Error::DuplicatePrimaryKeyValue`] when the
    /// key is taken and [`manifold_core::Error::PrimaryKeyValueNull`] when a
    /// key component is missing.
    pub fn insert(&self, record: Record) -> Result<Record> {
        let (key, record) = self.inner.pk.prepare_insert(record)?;
        self.inner
            .store
            .insert_new(key, VersionedRecord::new(record.clone()))?;
        Ok(record)
    }

    /// Insert several records, failing on the first conflict
    ///
    /// Not atomic: records inserted before a failure stay committed.
    pub fn bulk_insert(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            inserted.push(self.insert(record)?);
        }
        Ok(inserted)
    }

    /// Look up a record by primary key
    ///
    /// Waits for the key to be free of exclusive locks, then returns a
    /// defensive copy of the committed data.
    pub fn find_by_pk(&self, partial: &Record) -> Result<Option<Record>> {
        let key = self.inner.pk.build_pk(partial)?;
        self.wait_unlock(&key)?;
        Ok(self.inner.store.get_data(&key))
    }

    /// Whether a record exists under the given primary key
    pub fn contains(&self, partial: &Record) -> Result<bool> {
        let key = self.inner.pk.build_pk(partial)?;
        self.wait_unlock(&key)?;
        Ok(self.inner.store.contains(&key))
    }

    /// Committed version of the record under the given primary key
    ///
    /// Exposes the optimistic-concurrency token so callers can observe
    /// whether commits have touched a record.
    pub fn version_of(&self, partial: &Record) -> Result<Option<u64>> {
        let key = self.inner.pk.build_pk(partial)?;
        Ok(self.inner.store.version_of(&key))
    }

    /// Select committed records matching `filter`, projected onto `fields`
    ///
    /// An empty projection list keeps every field. Keys are scanned in map
    /// order, waiting out exclusive locks per key.
    pub fn select(&self, fields: &[&str], filter: &serde_json::Value) -> Result<Vec<Record>> {
        let compiled = CompiledFilter::compile(filter)?;
        let mut out = Vec::new();
        for key in self.inner.store.keys() {
            self.wait_unlock(&key)?;
            let Some(data) = self.inner.store.get_data(&key) else {
                continue;
            };
            if compiled.matches(&data) {
                out.push(data.project(fields));
            }
        }
        Ok(out)
    }

    /// Merge `fields` into every committed record matching `filter`
    ///
    /// Updates that touch primary-key fields rehome the record under its new
    /// key, rejecting collisions. Every matched record's version increments.
    /// Returns the number of affected records.
    ///
    /// Unlike reads and deletes, base-table updates do not wait on record
    /// locks: they write through, and a transaction holding a stale snapshot
    /// of the record finds out at validation time.
    pub fn update(&self, fields: &Record, filter: &serde_json::Value) -> Result<usize> {
        let compiled = CompiledFilter::compile(filter)?;
        let rekeying = self.inner.pk.is_partial_part_of_pk(fields);
        let mut affected = 0;

        for key in self.inner.store.keys() {
            let Some(current) = self.inner.store.get(&key) else {
                continue;
            };
            if !compiled.matches(&current.data) {
                continue;
            }

            if rekeying {
                let (old_pk, new_pk) = self.inner.pk.old_and_new_pk(&current.data, fields)?;
                if new_pk != old_pk {
                    if self.inner.store.contains(&new_pk) {
                        return Err(manifold_core::Error::DuplicatePrimaryKeyValue(new_pk));
                    }
                    let mut data = current.data;
                    data.merge(fields);
                    self.inner.store.remove(&old_pk);
                    self.inner
                        .store
                        .put(new_pk, VersionedRecord::with_version(data, current.version + 1));
                    affected += 1;
                    continue;
                }
            }

            let mut data = current.data;
            data.merge(fields);
            self.inner
                .store
                .put(key, VersionedRecord::with_version(data, current.version + 1));
            affected += 1;
        }
        Ok(affected)
    }

    /// Remove the record under the given primary key
    ///
    /// Waits for the key to be free of exclusive locks. Returns the removed
    /// data, or `None` when the key holds nothing.
    pub fn delete_by_pk(&self, partial: &Record) -> Result<Option<Record>> {
        let key = self.inner.pk.build_pk(partial)?;
        self.wait_unlock(&key)?;
        Ok(self.inner.store.remove(&key).map(|vr| vr.data))
    }

    /// Drop every committed record
    ///
    /// Transactions in flight keep their buffers; they will observe their
    /// version snapshots missing and fail prepare with an external
    /// modification.
    pub fn reset(&self) {
        self.inner.store.clear();
    }

    /// Bind a transaction to this table
    pub(crate) fn begin(&self, txn: TxnId, config: TransactionConfig) -> TransactionTable {
        TransactionTable::new(
            txn,
            self.inner.name.clone(),
            self.inner.store.clone(),
            Arc::clone(&self.inner.locks),
            Arc::clone(&self.inner.pk),
            config,
        )
    }

    fn wait_unlock(&self, key: &str) -> Result<()> {
        self.inner
            .locks
            .wait_unlock(key, self.inner.config.lock_timeout())
    }
}
