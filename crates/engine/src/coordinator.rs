//! Multi-table transaction coordinator
//!
//! A `Transaction` owns one `TransactionTable` per table it has touched,
//! created lazily on first `get`. Commit is two-phase: every participant
//! prepares (locks and validates), then every participant applies. Any
//! failure in either phase rolls every participant back and surfaces as a
//! transaction conflict.

use crate::table::Table;
use manifold_concurrency::{TransactionTable, TxnId};
use manifold_core::{Error, Result, TransactionConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A multi-table transaction
///
/// Cheap to clone; clones share the same participants and state, which lets
/// one thread roll back a transaction another thread is driving.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

struct TxnInner {
    id: TxnId,
    config: TransactionConfig,
    active: AtomicBool,
    registry: Arc<HashMap<String, Table>>,
    participants: Mutex<HashMap<String, TransactionTable>>,
}

impl Transaction {
    pub(crate) fn new(
        id: TxnId,
        config: TransactionConfig,
        registry: Arc<HashMap<String, Table>>,
    ) -> Self {
        Transaction {
            inner: Arc::new(TxnInner {
                id,
                config,
                active: AtomicBool::new(true),
                registry,
                participants: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Identifier of this transaction
    pub fn id(&self) -> TxnId {
        self.inner.id
    }

    /// Whether the transaction can still run operations
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Transaction-scoped handle to `table`
    ///
    /// The participant is created on first use and reused afterwards.
    ///
    /// # Errors
    /// Fails with [`Error::TableNotFound`] for unknown tables and
    /// [`Error::TransactionCompleted`] once the transaction has finished.
    pub fn get(&self, table: &str) -> Result<TransactionTable> {
        self.ensure_active()?;
        let mut participants = self.inner.participants.lock();
        if let Some(participant) = participants.get(table) {
            return Ok(participant.clone());
        }
        let base = self
            .inner
            .registry
            .get(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        let participant = base.begin(self.inner.id, self.inner.config);
        participants.insert(table.to_string(), participant.clone());
        debug!(txn = self.inner.id, table, "transaction joined table");
        Ok(participant)
    }

    /// Commit every touched table atomically
    ///
    /// Runs `prepare` on every participant, then `apply` on every
    /// participant. If any phase fails, every participant is rolled back and
    /// the failure surfaces as [`Error::TransactionConflict`].
    pub fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        let participants: Vec<TransactionTable> =
            self.inner.participants.lock().values().cloned().collect();

        for participant in &participants {
            if let Err(e) = participant.prepare() {
                self.abort(&participants);
                return Err(e.into_conflict(self.inner.id));
            }
        }
        for participant in &participants {
            if let Err(e) = participant.apply() {
                self.abort(&participants);
                return Err(e.into_conflict(self.inner.id));
            }
        }

        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.participants.lock().clear();
        info!(txn = self.inner.id, tables = participants.len(), "transaction committed");
        Ok(())
    }

    /// Roll every participant back and deactivate
    ///
    /// Idempotent: rolling back a finished transaction is a no-op.
    pub fn rollback(&self) -> Result<()> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let participants: Vec<TransactionTable> =
            self.inner.participants.lock().drain().map(|(_, p)| p).collect();
        for participant in &participants {
            let _ = participant.rollback();
        }
        info!(txn = self.inner.id, tables = participants.len(), "transaction rolled back");
        Ok(())
    }

    fn abort(&self, participants: &[TransactionTable]) {
        self.inner.active.store(false, Ordering::SeqCst);
        for participant in participants {
            let _ = participant.rollback();
        }
        self.inner.participants.lock().clear();
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::TransactionCompleted(self.inner.id))
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("tables", &self.inner.participants.lock().len())
            .finish()
    }
}
