//! Transactional CRUD surface and 2PC participant for one table
//!
//! A `TransactionTable` exposes the same operation set as the base table but
//! reads through the transaction's temp-store visibility rules and writes
//! into the temp store, never into committed state. Lock acquisition follows
//! the isolation level:
//!
//! - `ReadLatest` (`RepeatableRead`): reads of committed records take shared
//!   locks;
//! - `Serializable` (`StrictLocking`): reads take exclusive locks.
//!
//! Writes always take exclusive locks, upgrading a held shared lock. Commit
//! runs through the two participant phases: `prepare` (exclusive-lock every
//! touched committed key, validate the buffers) and `apply` (fold buffers
//! into the committed map, release everything).

use crate::lock::{LockMode, RecordLockManager, TxnId};
use crate::temp::{DeleteOutcome, TempStore, Visibility};
use manifold_core::{
    CompiledFilter, Error, IsolationLevel, PrimaryKey, Record, Result, TransactionConfig,
};
use manifold_storage::TableStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Transaction-scoped handle to one table
///
/// Cheap to clone; clones share the same buffers and lock bookkeeping.
#[derive(Clone)]
pub struct TransactionTable {
    inner: Arc<Inner>,
}

struct Inner {
    txn: TxnId,
    name: String,
    config: TransactionConfig,
    store: TableStore,
    locks: Arc<RecordLockManager>,
    pk: Arc<PrimaryKey>,
    active: AtomicBool,
    state: Mutex<TxState>,
}

/// Buffers and lock bookkeeping, guarded by one mutex
///
/// The mutex is held only for short buffer operations, never across a lock
/// wait, so a rollback from another thread can always make progress.
struct TxState {
    temp: TempStore,
    shared: HashSet<String>,
    exclusive: HashSet<String>,
}

impl TransactionTable {
    /// Bind a transaction to a table's committed store and lock manager
    pub fn new(
        txn: TxnId,
        name: impl Into<String>,
        store: TableStore,
        locks: Arc<RecordLockManager>,
        pk: Arc<PrimaryKey>,
        config: TransactionConfig,
    ) -> Self {
        let temp = TempStore::new(txn, Arc::clone(&pk), store.clone());
        TransactionTable {
            inner: Arc::new(Inner {
                txn,
                name: name.into(),
                config,
                store,
                locks,
                pk,
                active: AtomicBool::new(true),
                state: Mutex::new(TxState {
                    temp,
                    shared: HashSet::new(),
                    exclusive: HashSet::new(),
                }),
            }),
        }
    }

    /// Name of the underlying table
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identifier of the owning transaction
    pub fn txn_id(&self) -> TxnId {
        self.inner.txn
    }

    /// Whether the transaction is still active on this table
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Effective table size under this transaction's view
    pub fn size(&self) -> Result<usize> {
        self.ensure_active()?;
        Ok(self.inner.state.lock().temp.size())
    }

    /// Buffer a new record; visible only inside this transaction until commit
    pub fn insert(&self, record: Record) -> Result<Record> {
        self.ensure_active()?;
        self.inner.state.lock().temp.insert(record)
    }

    /// Buffer several records, failing on the first conflict
    pub fn bulk_insert(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        self.ensure_active()?;
        let mut state = self.inner.state.lock();
        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            inserted.push(state.temp.insert(record)?);
        }
        Ok(inserted)
    }

    /// Look up a record by primary key under this transaction's view
    ///
    /// Takes a read lock per the isolation level before consulting the
    /// buffers. A lock acquired for a key that turns out to hold nothing is
    /// released immediately.
    pub fn find_by_pk(&self, partial: &Record) -> Result<Option<Record>> {
        self.ensure_active()?;
        let key = self.inner.pk.build_pk(partial)?;
        let newly = self.lock_record(&key, self.read_mode())?;

        let visibility = self.inner.state.lock().temp.find_by_pk(&key);
        match visibility {
            Visibility::Present(data) => Ok(Some(data)),
            Visibility::Deleted => Ok(None),
            Visibility::Absent => {
                if newly {
                    self.unlock_record(&key);
                }
                Ok(None)
            }
        }
    }

    /// Select records matching `filter`, projected onto `fields`
    ///
    /// Committed keys are scanned in map order (waiting out foreign exclusive
    /// locks, then read-locking every match), followed by this transaction's
    /// buffered inserts in insertion order.
    pub fn select(&self, fields: &[&str], filter: &serde_json::Value) -> Result<Vec<Record>> {
        self.ensure_active()?;
        let compiled = CompiledFilter::compile(filter)?;
        let mut out = Vec::new();

        for key in self.inner.store.keys() {
            if !self.holds_lock(&key) {
                self.inner
                    .locks
                    .wait_unlock(&key, self.inner.config.lock_timeout())?;
            }
            let Some(data) = self.inner.state.lock().temp.record_state(&key) else {
                continue;
            };
            if !compiled.matches(&data) {
                continue;
            }
            self.lock_record(&key, self.read_mode())?;
            out.push(data.project(fields));
        }

        let inserts = self.inner.state.lock().temp.inserts_in_order();
        for (_, data) in inserts {
            if compiled.matches(&data) {
                out.push(data.project(fields));
            }
        }
        Ok(out)
    }

    /// Merge `fields` into every record matching `filter`
    ///
    /// Matching committed records are exclusive-locked and revalidated under
    /// the lock (committed version unmoved, predicate still true) before the
    /// change lands in the temp store; a record that fails revalidation is
    /// skipped and its fresh lock released. Buffered inserts are updated
    /// without locking. Returns the number of affected records.
    pub fn update(&self, fields: &Record, filter: &serde_json::Value) -> Result<usize> {
        self.ensure_active()?;
        let compiled = CompiledFilter::compile(filter)?;
        let mut affected = 0;

        for key in self.inner.store.keys() {
            let observed = self.inner.store.version_of(&key);
            let Some(data) = self.inner.state.lock().temp.record_state(&key) else {
                continue;
            };
            if !compiled.matches(&data) {
                continue;
            }

            let newly = self.lock_record(&key, LockMode::Exclusive)?;

            // Optimistic revalidation now that the key is exclusively ours
            let current = self.inner.store.get(&key);
            let version_stable = observed == current.as_ref().map(|vr| vr.version);
            let still_matches = version_stable
                && self
                    .inner
                    .state
                    .lock()
                    .temp
                    .record_state(&key)
                    .map(|d| compiled.matches(&d))
                    .unwrap_or(false);
            if !still_matches {
                if newly {
                    self.unlock_record(&key);
                }
                debug!(txn = self.inner.txn, key = %key, "update revalidation skipped record");
                continue;
            }

            let applied = self
                .inner
                .state
                .lock()
                .temp
                .update_committed(&key, current.as_ref(), fields)?;
            if applied {
                affected += 1;
            }
        }

        // Buffered inserts are private to the transaction; no locks needed
        let insert_keys: Vec<String> = self
            .inner
            .state
            .lock()
            .temp
            .inserts_in_order()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in insert_keys {
            let mut state = self.inner.state.lock();
            let Some(data) = state.temp.get_insert(&key) else {
                continue;
            };
            if !compiled.matches(&data) {
                continue;
            }
            if state.temp.update_inserted(&key, fields)? {
                affected += 1;
            }
        }
        Ok(affected)
    }

    /// Buffer the deletion of the record under the given key
    ///
    /// Returns the deleted record's data, or `None` when the key holds
    /// nothing (or was already deleted inside this transaction).
    pub fn delete_by_pk(&self, partial: &Record) -> Result<Option<Record>> {
        self.ensure_active()?;
        let key = self.inner.pk.build_pk(partial)?;
        let newly = self.lock_record(&key, LockMode::Exclusive)?;

        let outcome = self.inner.state.lock().temp.delete_by_pk(&key);
        match outcome {
            DeleteOutcome::Deleted(data) => Ok(Some(data)),
            DeleteOutcome::AlreadyDeleted => Ok(None),
            DeleteOutcome::NotFound => {
                if newly {
                    self.unlock_record(&key);
                }
                Ok(None)
            }
        }
    }

    // === 2PC participant ===

    /// First commit phase: lock and validate
    ///
    /// Exclusive-locks every committed key this transaction touched, then
    /// validates the buffers against the committed map. Any failure rolls
    /// this participant back and surfaces as a transaction conflict.
    pub fn prepare(&self) -> Result<()> {
        self.ensure_active()?;

        let touched = self.inner.state.lock().temp.original_pks();
        for key in touched {
            if let Err(e) = self.lock_record(&key, LockMode::Exclusive) {
                let _ = self.rollback();
                return Err(e.into_conflict(self.inner.txn));
            }
        }

        if let Err(e) = self.inner.state.lock().temp.validate() {
            let _ = self.rollback();
            return Err(e.into_conflict(self.inner.txn));
        }
        Ok(())
    }

    /// Second commit phase: fold buffers into the committed map
    ///
    /// On success every lock is released and the participant deactivates.
    /// Errors propagate unwrapped; the coordinator rolls everything back.
    pub fn apply(&self) -> Result<()> {
        self.ensure_active()?;
        self.inner.state.lock().temp.apply()?;
        self.finish();
        Ok(())
    }

    /// Discard the buffers, release every lock, deactivate
    ///
    /// Idempotent: a second rollback is a no-op. Queued lock waits owned by
    /// this transaction are cancelled so blocked operations unblock.
    pub fn rollback(&self) -> Result<()> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.locks.cancel(self.inner.txn);
        self.release_everything();
        debug!(txn = self.inner.txn, table = %self.inner.name, "transaction table rolled back");
        Ok(())
    }

    // === internals ===

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::TransactionCompleted(self.inner.txn))
        }
    }

    fn read_mode(&self) -> LockMode {
        match self.inner.config.isolation_level {
            IsolationLevel::ReadLatest => LockMode::Shared,
            IsolationLevel::Serializable => LockMode::Exclusive,
        }
    }

    fn holds_lock(&self, key: &str) -> bool {
        let state = self.inner.state.lock();
        state.exclusive.contains(key) || state.shared.contains(key)
    }

    /// Acquire a record lock, tracking it in the transaction's lock sets
    ///
    /// Returns whether the transaction went from holding nothing on the key
    /// to holding a grant (an upgrade does not count as "newly held").
    /// The state mutex is never held across the blocking acquisition.
    fn lock_record(&self, key: &str, mode: LockMode) -> Result<bool> {
        let previously_held = {
            let state = self.inner.state.lock();
            if state.exclusive.contains(key) {
                return Ok(false);
            }
            if mode == LockMode::Shared && state.shared.contains(key) {
                return Ok(false);
            }
            state.shared.contains(key)
        };

        match self
            .inner
            .locks
            .acquire(self.inner.txn, key, mode, self.inner.config.lock_timeout())
        {
            Ok(_) => {
                if !self.is_active() {
                    // Rolled back from another thread while we were waiting
                    self.inner.locks.release(self.inner.txn, key);
                    return Err(Error::TransactionCompleted(self.inner.txn));
                }
                let mut state = self.inner.state.lock();
                match mode {
                    LockMode::Shared => {
                        state.shared.insert(key.to_string());
                    }
                    LockMode::Exclusive => {
                        state.shared.remove(key);
                        state.exclusive.insert(key.to_string());
                    }
                }
                Ok(!previously_held)
            }
            Err(e) => {
                if mode == LockMode::Exclusive {
                    // A timed-out upgrade already gave up the shared grant
                    self.inner.state.lock().shared.remove(key);
                }
                Err(e)
            }
        }
    }

    fn unlock_record(&self, key: &str) {
        self.inner.locks.release(self.inner.txn, key);
        let mut state = self.inner.state.lock();
        state.shared.remove(key);
        state.exclusive.remove(key);
    }

    fn release_everything(&self) {
        let (shared, exclusive) = {
            let mut state = self.inner.state.lock();
            state.temp.clear();
            (
                std::mem::take(&mut state.shared),
                std::mem::take(&mut state.exclusive),
            )
        };
        self.inner
            .locks
            .release_all(self.inner.txn, shared.iter().chain(exclusive.iter()));
    }

    fn finish(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.release_everything();
    }
}

impl std::fmt::Debug for TransactionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTable")
            .field("txn", &self.inner.txn)
            .field("table", &self.inner.name)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_storage::VersionedRecord;
    use serde_json::json;

    fn rec(json: serde_json::Value) -> Record {
        Record::from_json(&json).unwrap()
    }

    struct Fixture {
        store: TableStore,
        locks: Arc<RecordLockManager>,
        pk: Arc<PrimaryKey>,
        next_txn: TxnId,
    }

    impl Fixture {
        fn new(pk_fields: &[&str]) -> Self {
            Fixture {
                store: TableStore::new(),
                locks: Arc::new(RecordLockManager::new()),
                pk: Arc::new(
                    PrimaryKey::new(pk_fields.iter().map(|s| s.to_string()).collect()).unwrap(),
                ),
                next_txn: 0,
            }
        }

        fn seed(&self, records: &[serde_json::Value]) {
            for json in records {
                let record = rec(json.clone());
                let key = self.pk.build_pk(&record).unwrap();
                self.store
                    .insert_new(key, VersionedRecord::new(record))
                    .unwrap();
            }
        }

        fn begin(&mut self, config: TransactionConfig) -> TransactionTable {
            self.next_txn += 1;
            TransactionTable::new(
                self.next_txn,
                "items",
                self.store.clone(),
                Arc::clone(&self.locks),
                Arc::clone(&self.pk),
                config,
            )
        }
    }

    fn quick(level: IsolationLevel) -> TransactionConfig {
        TransactionConfig {
            isolation_level: level,
            lock_timeout_ms: 100,
        }
    }

    #[test]
    fn test_insert_select_commit_round_trip() {
        let mut fx = Fixture::new(&["id"]);
        fx.seed(&[json!({"id": 1, "n": 1})]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));

        tx.insert(rec(json!({"id": 2, "n": 2}))).unwrap();
        assert_eq!(tx.size().unwrap(), 2);
        assert_eq!(fx.store.len(), 1);

        let rows = tx.select(&[], &json!({})).unwrap();
        assert_eq!(rows.len(), 2);

        tx.prepare().unwrap();
        tx.apply().unwrap();
        assert_eq!(fx.store.len(), 2);
        assert!(!tx.is_active());
    }

    #[test]
    fn test_read_lock_released_when_record_missing() {
        let mut fx = Fixture::new(&["id"]);
        let tx = fx.begin(quick(IsolationLevel::Serializable));

        assert_eq!(tx.find_by_pk(&rec(json!({"id": 9}))).unwrap(), None);
        // the speculative exclusive read-lock on "9" must be gone
        assert!(!fx.locks.is_exclusively_locked("9"));
    }

    #[test]
    fn test_delete_lock_released_when_record_missing() {
        let mut fx = Fixture::new(&["id"]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));

        assert_eq!(tx.delete_by_pk(&rec(json!({"id": 9}))).unwrap(), None);
        assert!(!fx.locks.is_exclusively_locked("9"));
    }

    #[test]
    fn test_update_holds_exclusive_until_commit() {
        let mut fx = Fixture::new(&["id"]);
        fx.seed(&[json!({"id": 1, "n": 1})]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));

        assert_eq!(tx.update(&rec(json!({"n": 5})), &json!({"id": 1})).unwrap(), 1);
        assert!(fx.locks.is_exclusively_locked("1"));

        // committed state unchanged until apply
        assert_eq!(fx.store.get("1").unwrap().version, 1);
        tx.prepare().unwrap();
        tx.apply().unwrap();

        let committed = fx.store.get("1").unwrap();
        assert_eq!(committed.version, 2);
        assert_eq!(committed.data, rec(json!({"id": 1, "n": 5})));
        assert!(!fx.locks.is_exclusively_locked("1"));
    }

    #[test]
    fn test_update_revalidation_skips_externally_bumped_record() {
        let mut fx = Fixture::new(&["id"]);
        fx.seed(&[json!({"id": 1, "n": 1})]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));

        // first update snapshots version 1 and takes the exclusive lock
        tx.update(&rec(json!({"n": 2})), &json!({"id": 1})).unwrap();

        // an outside writer bumps the committed version under our feet;
        // the next update still applies (we hold the lock and our pending
        // state matches), but prepare detects the snapshot mismatch
        fx.store.put(
            "1".into(),
            VersionedRecord::with_version(rec(json!({"id": 1, "n": 7})), 2),
        );
        let err = tx.prepare().unwrap_err();
        assert!(err.is_conflict());
        assert!(!tx.is_active());
    }

    #[test]
    fn test_operations_fail_after_rollback() {
        let mut fx = Fixture::new(&["id"]);
        fx.seed(&[json!({"id": 1})]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));

        tx.find_by_pk(&rec(json!({"id": 1}))).unwrap();
        tx.rollback().unwrap();
        tx.rollback().unwrap(); // idempotent

        assert!(tx.insert(rec(json!({"id": 2}))).unwrap_err().is_completed());
        assert!(tx.size().unwrap_err().is_completed());
        assert!(tx
            .find_by_pk(&rec(json!({"id": 1})))
            .unwrap_err()
            .is_completed());
        // shared lock from the read is gone
        assert_eq!(fx.locks.shared_holder_count("1"), 0);
    }

    #[test]
    fn test_select_sees_pending_update_not_committed_data() {
        let mut fx = Fixture::new(&["id"]);
        fx.seed(&[json!({"id": 1, "price": 100}), json!({"id": 2, "price": 900})]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));

        tx.update(&rec(json!({"price": 1000})), &json!({"id": 1})).unwrap();

        let expensive = tx.select(&[], &json!({"price": {"$gte": 1000}})).unwrap();
        assert_eq!(expensive.len(), 1);
        assert_eq!(expensive[0].get("id"), Some(&manifold_core::Value::Int(1)));

        let cheap = tx.select(&[], &json!({"price": {"$lt": 1000}})).unwrap();
        assert!(cheap.is_empty());
    }

    #[test]
    fn test_select_orders_committed_before_inserts() {
        let mut fx = Fixture::new(&["id"]);
        fx.seed(&[json!({"id": 2}), json!({"id": 1})]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));
        tx.insert(rec(json!({"id": 9}))).unwrap();
        tx.insert(rec(json!({"id": 3}))).unwrap();

        let rows = tx.select(&["id"], &json!({})).unwrap();
        let ids: Vec<i64> = rows
            .iter()
            .map(|r| match r.get("id").unwrap() {
                manifold_core::Value::Int(i) => *i,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        // committed keys in map order, then inserts in insertion order
        assert_eq!(ids, vec![1, 2, 9, 3]);
    }

    #[test]
    fn test_update_rekeys_inserted_record() {
        let mut fx = Fixture::new(&["id"]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));
        tx.insert(rec(json!({"id": 1, "n": 1}))).unwrap();

        assert_eq!(tx.update(&rec(json!({"id": 5})), &json!({"n": 1})).unwrap(), 1);
        assert_eq!(tx.find_by_pk(&rec(json!({"id": 1}))).unwrap(), None);
        assert_eq!(
            tx.find_by_pk(&rec(json!({"id": 5}))).unwrap(),
            Some(rec(json!({"id": 5, "n": 1})))
        );
    }

    #[test]
    fn test_prepare_conflict_on_duplicate_insert() {
        let mut fx = Fixture::new(&["id"]);
        let tx = fx.begin(quick(IsolationLevel::ReadLatest));
        tx.insert(rec(json!({"id": 1, "v": "mine"}))).unwrap();

        // a base-table writer commits the same key first
        fx.store
            .insert_new("1".into(), VersionedRecord::new(rec(json!({"id": 1}))))
            .unwrap();

        let err = tx.prepare().unwrap_err();
        assert!(err.is_conflict());
        assert!(!tx.is_active());
        // committed state untouched
        assert_eq!(fx.store.get_data("1").unwrap(), rec(json!({"id": 1})));
    }
}
