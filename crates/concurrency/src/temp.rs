//! Per-transaction, per-table buffer of uncommitted changes
//!
//! A `TempStore` buffers every write of one transaction against one table
//! without mutating committed state:
//!
//! - `inserts`: insertion-ordered map of uncommitted new records;
//! - `originals`: committed-PK → pending change (update or delete), keyed by
//!   the primary key the record had when the transaction first touched it,
//!   carrying a snapshot of the committed version;
//! - `updated_index`: new-PK → committed-PK index for updates that changed
//!   the primary key, so the record stays reachable under its new key while
//!   the old key can still be released at apply time.
//!
//! Validation checks the buffers against the committed map under the record
//! locks taken by prepare; apply folds the buffers into the committed map.

use crate::lock::TxnId;
use indexmap::IndexMap;
use manifold_core::{Error, PrimaryKey, Record, Result};
use manifold_storage::{TableStore, VersionedRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Kind of a pending change to a committed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeAction {
    Updated,
    Deleted,
}

/// A pending update or delete of one committed record
#[derive(Debug, Clone)]
struct TemporalChange {
    action: ChangeAction,
    /// Pending data plus the committed version snapshotted at first touch
    changes: VersionedRecord,
    /// Whether the pending data still yields the committed primary key
    has_original_pk: bool,
}

/// How a record resolves under the transaction's view of one key
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Visibility {
    /// The record exists with this pending-or-committed data
    Present(Record),
    /// The record was deleted inside this transaction
    Deleted,
    /// No record exists under the key in this transaction's view
    Absent,
}

/// Result of a transactional delete
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The record existed; its data at deletion time
    Deleted(Record),
    /// The record was already deleted inside this transaction
    AlreadyDeleted,
    /// No record exists under the key
    NotFound,
}

/// Buffer of one transaction's uncommitted changes to one table
#[derive(Debug)]
pub struct TempStore {
    txn: TxnId,
    pk: Arc<PrimaryKey>,
    store: TableStore,
    inserts: IndexMap<String, VersionedRecord>,
    originals: HashMap<String, TemporalChange>,
    updated_index: HashMap<String, String>,
    committed_deletes: usize,
}

impl TempStore {
    /// Create an empty buffer bound to a table's committed store
    pub fn new(txn: TxnId, pk: Arc<PrimaryKey>, store: TableStore) -> Self {
        TempStore {
            txn,
            pk,
            store,
            inserts: IndexMap::new(),
            originals: HashMap::new(),
            updated_index: HashMap::new(),
            committed_deletes: 0,
        }
    }

    /// Effective table size under this transaction's view
    pub fn size(&self) -> usize {
        self.store.len() + self.inserts.len() - self.committed_deletes
    }

    /// Whether the buffer holds no pending changes
    pub fn is_clean(&self) -> bool {
        self.inserts.is_empty() && self.originals.is_empty()
    }

    /// Committed primary keys this transaction has touched
    pub fn original_pks(&self) -> Vec<String> {
        self.originals.keys().cloned().collect()
    }

    /// Buffer a new record
    ///
    /// Generates a fresh `_id` for default-keyed tables when absent. Returns
    /// a copy of the buffered data.
    ///
    /// # Errors
    /// Fails with [`Error::DuplicatePrimaryKeyValue`] when the key is in use
    /// under this transaction's view.
    pub fn insert(&mut self, record: Record) -> Result<Record> {
        let (pk, record) = self.pk.prepare_insert(record)?;
        if self.is_primary_key_in_use(&pk) {
            return Err(Error::DuplicatePrimaryKeyValue(pk));
        }
        self.inserts.insert(pk, VersionedRecord::new(record.clone()));
        Ok(record)
    }

    /// Whether `pk` identifies a record under this transaction's view
    ///
    /// A committed key is not "in use" when this transaction has scheduled it
    /// for deletion or for an update that abandons the key.
    pub fn is_primary_key_in_use(&self, pk: &str) -> bool {
        if self.inserts.contains_key(pk) || self.updated_index.contains_key(pk) {
            return true;
        }
        match self.originals.get(pk) {
            Some(change) => change.action == ChangeAction::Updated && change.has_original_pk,
            None => self.store.contains(pk),
        }
    }

    /// Resolve `pk` under the transaction's full view
    ///
    /// Resolution order: inserts, then the updated-PK index, then pending
    /// changes at the original key, then the committed map. The original key
    /// of a PK-changing update resolves to [`Visibility::Absent`] without
    /// falling through to the committed record it shadows.
    pub(crate) fn find_by_pk(&self, pk: &str) -> Visibility {
        if let Some(vr) = self.inserts.get(pk) {
            return Visibility::Present(vr.data.clone());
        }
        if let Some(original_pk) = self.updated_index.get(pk) {
            let change = &self.originals[original_pk];
            return Visibility::Present(change.changes.data.clone());
        }
        if let Some(change) = self.originals.get(pk) {
            return match change.action {
                ChangeAction::Deleted => Visibility::Deleted,
                ChangeAction::Updated if change.has_original_pk => {
                    Visibility::Present(change.changes.data.clone())
                }
                // The pending state re-keyed the record away from this key
                ChangeAction::Updated => Visibility::Absent,
            };
        }
        match self.store.get_data(pk) {
            Some(data) => Visibility::Present(data),
            None => Visibility::Absent,
        }
    }

    /// Pending-or-committed data of the committed key `pk`
    ///
    /// Used by scans over committed keys: a pending update contributes its
    /// pending data even when it re-keys the record, a pending delete hides
    /// the record, and untouched keys read through to the committed map.
    pub fn record_state(&self, pk: &str) -> Option<Record> {
        match self.originals.get(pk) {
            Some(change) => match change.action {
                ChangeAction::Deleted => None,
                ChangeAction::Updated => Some(change.changes.data.clone()),
            },
            None => self.store.get_data(pk),
        }
    }

    /// Copy of a buffered insert's data
    pub fn get_insert(&self, pk: &str) -> Option<Record> {
        self.inserts.get(pk).map(|vr| vr.data.clone())
    }

    /// Buffered inserts in insertion order
    pub fn inserts_in_order(&self) -> Vec<(String, Record)> {
        self.inserts
            .iter()
            .map(|(pk, vr)| (pk.clone(), vr.data.clone()))
            .collect()
    }

    /// Merge `fields` into the buffered insert under `pk`
    ///
    /// Returns `false` when no insert is buffered under `pk`. Re-keys the
    /// buffer entry when the update changes primary-key fields.
    ///
    /// # Errors
    /// Fails with [`Error::DuplicatePrimaryKeyValue`] when re-keying onto a
    /// key that is in use.
    pub fn update_inserted(&mut self, pk: &str, fields: &Record) -> Result<bool> {
        let Some(vr) = self.inserts.get(pk) else {
            return Ok(false);
        };
        let mut merged = vr.data.clone();
        merged.merge(fields);
        let new_pk = self.pk.build_pk(&merged)?;

        if new_pk == pk {
            self.inserts
                .get_mut(pk)
                .expect("presence checked")
                .data = merged;
        } else {
            if self.is_primary_key_in_use(&new_pk) {
                return Err(Error::DuplicatePrimaryKeyValue(new_pk));
            }
            let mut vr = self.inserts.shift_remove(pk).expect("presence checked");
            vr.data = merged;
            self.inserts.insert(new_pk, vr);
        }
        Ok(true)
    }

    /// Merge `fields` into the pending state of committed key `pk`
    ///
    /// On first touch the committed version is snapshotted into a new
    /// pending change; later touches merge into the existing change and
    /// re-key the updated-PK index when the pending primary key moves.
    /// Returns whether a pending change was recorded: pending deletes and a
    /// first touch without a committed record are no-ops.
    ///
    /// # Errors
    /// Fails with [`Error::DuplicatePrimaryKeyValue`] when the pending state
    /// re-keys onto a key that is in use, and with
    /// [`Error::PrimaryKeyValueNull`] when the update nulls a key component.
    pub fn update_committed(
        &mut self,
        pk: &str,
        committed: Option<&VersionedRecord>,
        fields: &Record,
    ) -> Result<bool> {
        enum Touch {
            Skip,
            Repeat { previous_pk: String, merged: Record },
            First { merged: Record, version: u64 },
        }

        let touch = match self.originals.get(pk) {
            // Deleted records are invisible to scans; nothing to update
            Some(change) if change.action == ChangeAction::Deleted => Touch::Skip,
            Some(change) => {
                let previous_pk = if change.has_original_pk {
                    pk.to_string()
                } else {
                    self.pk.build_pk(&change.changes.data)?
                };
                let mut merged = change.changes.data.clone();
                merged.merge(fields);
                Touch::Repeat { previous_pk, merged }
            }
            None => match committed {
                Some(committed) => {
                    let mut merged = committed.data.clone();
                    merged.merge(fields);
                    Touch::First {
                        merged,
                        version: committed.version,
                    }
                }
                None => Touch::Skip,
            },
        };

        match touch {
            Touch::Skip => Ok(false),
            Touch::Repeat { previous_pk, merged } => {
                let new_pk = self.pk.build_pk(&merged)?;
                if new_pk != previous_pk && new_pk != pk && self.is_primary_key_in_use(&new_pk) {
                    return Err(Error::DuplicatePrimaryKeyValue(new_pk));
                }

                let change = self.originals.get_mut(pk).expect("presence checked");
                change.changes.data = merged;
                if new_pk != previous_pk {
                    if previous_pk != pk {
                        self.updated_index.remove(&previous_pk);
                    }
                    if new_pk == pk {
                        change.has_original_pk = true;
                    } else {
                        change.has_original_pk = false;
                        self.updated_index.insert(new_pk, pk.to_string());
                    }
                }
                Ok(true)
            }
            Touch::First { merged, version } => {
                let new_pk = self.pk.build_pk(&merged)?;
                let has_original_pk = new_pk == pk;

                if !has_original_pk && self.is_primary_key_in_use(&new_pk) {
                    return Err(Error::DuplicatePrimaryKeyValue(new_pk));
                }

                self.originals.insert(
                    pk.to_string(),
                    TemporalChange {
                        action: ChangeAction::Updated,
                        changes: VersionedRecord::with_version(merged, version),
                        has_original_pk,
                    },
                );
                if !has_original_pk {
                    self.updated_index.insert(new_pk, pk.to_string());
                }
                Ok(true)
            }
        }
    }

    /// Buffer the deletion of the record under `pk`
    ///
    /// Resolution order: a buffered insert is simply dropped; a PK-changing
    /// update reached through its new key is demoted to a delete of the
    /// committed record; a pending change at the original key is converted;
    /// otherwise an untouched committed record gets a fresh delete mark.
    pub fn delete_by_pk(&mut self, pk: &str) -> DeleteOutcome {
        if let Some(vr) = self.inserts.shift_remove(pk) {
            return DeleteOutcome::Deleted(vr.data);
        }

        if let Some(original_pk) = self.updated_index.remove(pk) {
            let change = self
                .originals
                .get_mut(&original_pk)
                .expect("index entries always have an original");
            change.action = ChangeAction::Deleted;
            change.has_original_pk = true;
            self.committed_deletes += 1;
            return DeleteOutcome::Deleted(change.changes.data.clone());
        }

        if let Some(change) = self.originals.get_mut(pk) {
            if change.action == ChangeAction::Deleted {
                return DeleteOutcome::AlreadyDeleted;
            }
            if !change.has_original_pk {
                // Forget the pending re-key; the delete lands on the original key
                if let Ok(new_pk) = self.pk.build_pk(&change.changes.data) {
                    self.updated_index.remove(&new_pk);
                }
            }
            change.action = ChangeAction::Deleted;
            change.has_original_pk = true;
            self.committed_deletes += 1;
            return DeleteOutcome::Deleted(change.changes.data.clone());
        }

        match self.store.get(pk) {
            Some(vr) => {
                let data = vr.data.clone();
                self.originals.insert(
                    pk.to_string(),
                    TemporalChange {
                        action: ChangeAction::Deleted,
                        changes: vr,
                        has_original_pk: true,
                    },
                );
                self.committed_deletes += 1;
                DeleteOutcome::Deleted(data)
            }
            None => DeleteOutcome::NotFound,
        }
    }

    /// Check the buffers against the committed map before apply
    ///
    /// Callers hold exclusive record locks on every original key. Three
    /// preconditions:
    /// 1. an insert may collide with a committed key only when this
    ///    transaction schedules that key for deletion or abandonment;
    /// 2. the new key of a PK-changing update may collide under the same
    ///    rule;
    /// 3. every touched committed record must still exist at its snapshotted
    ///    version.
    pub fn validate(&self) -> Result<()> {
        let committed = self.store.read();

        for pk in self.inserts.keys() {
            if committed.contains_key(pk) && !self.frees_committed_key(pk) {
                return Err(Error::DuplicatePrimaryKeyValue(pk.clone()));
            }
        }

        for new_pk in self.updated_index.keys() {
            if committed.contains_key(new_pk) && !self.frees_committed_key(new_pk) {
                return Err(Error::DuplicatePrimaryKeyValue(new_pk.clone()));
            }
        }

        for (pk, change) in &self.originals {
            match committed.get(pk) {
                Some(vr) if vr.version == change.changes.version => {}
                other => {
                    return Err(Error::ExternalModification {
                        pk: pk.clone(),
                        expected: change.changes.version,
                        actual: other.map(|vr| vr.version),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether this transaction's pending changes free the committed key `pk`
    ///
    /// True when the key is scheduled for deletion or for an update whose
    /// pending state abandons it.
    fn frees_committed_key(&self, pk: &str) -> bool {
        self.originals.get(pk).is_some_and(|change| {
            change.action == ChangeAction::Deleted || !change.has_original_pk
        })
    }

    /// Fold the buffers into the committed map
    ///
    /// Holds the committed map's write guard for the whole pass: versions and
    /// residual collisions are re-verified first, then deletions and re-keyed
    /// originals are removed, then updates and inserts land. Nothing is
    /// mutated when verification fails.
    ///
    /// # Errors
    /// Fails with [`Error::ExternalModification`] on a version mismatch and
    /// [`Error::DuplicatePrimaryKeyValue`] on a residual key collision.
    pub fn apply(&mut self) -> Result<()> {
        let mut committed = self.store.write();

        // Verify versions of every touched committed record
        for (pk, change) in &self.originals {
            match committed.get(pk) {
                Some(vr) if vr.version == change.changes.version => {}
                other => {
                    return Err(Error::ExternalModification {
                        pk: pk.clone(),
                        expected: change.changes.version,
                        actual: other.map(|vr| vr.version),
                    });
                }
            }
        }

        // Keys freed by this apply: deletes plus abandoned original keys
        let freed: Vec<&String> = self
            .originals
            .iter()
            .filter(|(_, c)| c.action == ChangeAction::Deleted || !c.has_original_pk)
            .map(|(pk, _)| pk)
            .collect();

        // Verify landing spots for re-keyed updates and inserts
        for new_pk in self.updated_index.keys() {
            if committed.contains_key(new_pk) && !freed.contains(&new_pk) {
                return Err(Error::DuplicatePrimaryKeyValue(new_pk.clone()));
            }
        }
        for pk in self.inserts.keys() {
            if (committed.contains_key(pk) && !freed.contains(&pk)) || self.updated_index.contains_key(pk)
            {
                return Err(Error::DuplicatePrimaryKeyValue(pk.clone()));
            }
        }

        // New key of every re-keying update, looked up by original key
        let rehome_targets: HashMap<String, String> = self
            .updated_index
            .iter()
            .map(|(new_pk, original_pk)| (original_pk.clone(), new_pk.clone()))
            .collect();

        // Remove deletions and vacate re-keyed originals first so swapped
        // keys between records cannot collide mid-apply
        let mut rehomed: Vec<(String, VersionedRecord)> = Vec::new();
        for (pk, change) in self.originals.drain() {
            let current_version = committed
                .get(&pk)
                .map(|vr| vr.version)
                .expect("verified above");
            match change.action {
                ChangeAction::Deleted => {
                    committed.remove(&pk);
                }
                ChangeAction::Updated => {
                    let next = VersionedRecord::with_version(
                        change.changes.data,
                        current_version + 1,
                    );
                    if change.has_original_pk {
                        committed.insert(pk, next);
                    } else {
                        committed.remove(&pk);
                        let new_pk = rehome_targets
                            .get(&pk)
                            .expect("re-keying updates are indexed")
                            .clone();
                        rehomed.push((new_pk, next));
                    }
                }
            }
        }
        for (new_pk, record) in rehomed {
            committed.insert(new_pk, record);
        }
        for (pk, record) in self.inserts.drain(..) {
            committed.insert(pk, record);
        }

        debug!(txn = self.txn, "applied transaction buffers");
        self.updated_index.clear();
        self.committed_deletes = 0;
        Ok(())
    }

    /// Discard every pending change
    pub fn clear(&mut self) {
        self.inserts.clear();
        self.originals.clear();
        self.updated_index.clear();
        self.committed_deletes = 0;
    }
}
