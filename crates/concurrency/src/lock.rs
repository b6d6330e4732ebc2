//! Per-record shared/exclusive locks with timed acquisition
//!
//! Locks are keyed by primary-key string. Each key holds at most one
//! exclusive holder or any number of shared holders, plus a FIFO queue of
//! waiters. There is no deadlock detection: deadlocks resolve through the
//! per-request timeout, which rejects only the timed-out waiter.
//!
//! ## Grant discipline
//!
//! - A request is granted immediately when compatible: shared requests need
//!   no exclusive holder, exclusive requests need no holder at all.
//! - Otherwise the request enqueues and waits. On every release the queue is
//!   drained front-to-back: a head exclusive is granted alone, a head shared
//!   is granted together with every consecutive shared waiter behind it.
//! - Re-entrancy: a transaction holding exclusive is granted any further
//!   request on the same key immediately; holding shared, a shared request
//!   returns immediately while an exclusive request releases the shared
//!   grant and enqueues (upgrade).

use manifold_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Transaction identifier used by the lock manager
pub type TxnId = u64;

/// Lock mode of a request or grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Compatible with other shared holders
    Shared,
    /// Requires sole ownership of the key
    Exclusive,
}

/// How an acquisition was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The lock was newly granted to the transaction
    Acquired,
    /// The transaction already held a sufficient lock on the key
    AlreadyHeld,
}

const WAITING: u8 = 0;
const GRANTED: u8 = 1;
const CANCELLED: u8 = 2;

struct Waiter {
    txn: TxnId,
    mode: LockMode,
    state: AtomicU8,
}

#[derive(Default)]
struct KeyLock {
    shared: HashSet<TxnId>,
    exclusive: Option<TxnId>,
    waiters: VecDeque<Arc<Waiter>>,
}

impl KeyLock {
    fn is_idle(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none() && self.waiters.is_empty()
    }
}

/// Shared/exclusive record locks for one table
///
/// Shared between the base table and every transaction table bound to it.
#[derive(Default)]
pub struct RecordLockManager {
    locks: Mutex<HashMap<String, KeyLock>>,
    cond: Condvar,
}

impl RecordLockManager {
    /// Create an empty lock manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a lock on `key` for `txn`, waiting up to `timeout`
    ///
    /// # Errors
    /// Fails with [`Error::LockTimeout`] when the lock is not granted within
    /// `timeout`, or when the wait is cancelled by a rollback. A timed-out
    /// shared→exclusive upgrade does not restore the shared grant.
    pub fn acquire(
        &self,
        txn: TxnId,
        key: &str,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Acquisition> {
        let mut locks = self.locks.lock();
        let lock = locks.entry(key.to_string()).or_default();

        // Re-entrancy: an exclusive holder is granted anything immediately
        if lock.exclusive == Some(txn) {
            return Ok(Acquisition::AlreadyHeld);
        }
        let holds_shared = lock.shared.contains(&txn);

        match mode {
            LockMode::Shared => {
                if holds_shared {
                    return Ok(Acquisition::AlreadyHeld);
                }
                if lock.exclusive.is_none() {
                    lock.shared.insert(txn);
                    return Ok(Acquisition::Acquired);
                }
            }
            LockMode::Exclusive => {
                if holds_shared {
                    // Upgrade: the shared grant is released before enqueueing
                    lock.shared.remove(&txn);
                    Self::grant_waiters(lock);
                    self.cond.notify_all();
                }
                if lock.shared.is_empty() && lock.exclusive.is_none() && lock.waiters.is_empty() {
                    lock.exclusive = Some(txn);
                    return Ok(Acquisition::Acquired);
                }
            }
        }

        // Incompatible: enqueue and wait
        let waiter = Arc::new(Waiter {
            txn,
            mode,
            state: AtomicU8::new(WAITING),
        });
        lock.waiters.push_back(Arc::clone(&waiter));

        let deadline = Instant::now() + timeout;
        loop {
            match waiter.state.load(Ordering::Acquire) {
                GRANTED => return Ok(Acquisition::Acquired),
                CANCELLED => {
                    self.remove_waiter(&mut locks, key, &waiter);
                    return Err(self.timeout_error(key, timeout));
                }
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.remove_waiter(&mut locks, key, &waiter);
                debug!(key, txn, ?mode, "lock acquisition timed out");
                return Err(self.timeout_error(key, timeout));
            }
            self.cond.wait_for(&mut locks, deadline - now);
        }
    }

    /// Release `txn`'s grant on `key` and wake compatible waiters
    ///
    /// A no-op when the transaction holds nothing on the key.
    pub fn release(&self, txn: TxnId, key: &str) {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get_mut(key) {
            lock.shared.remove(&txn);
            if lock.exclusive == Some(txn) {
                lock.exclusive = None;
            }
            Self::grant_waiters(lock);
            if lock.is_idle() {
                locks.remove(key);
            }
            self.cond.notify_all();
        }
    }

    /// Release every key in `keys` held by `txn`
    pub fn release_all<I>(&self, txn: TxnId, keys: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut locks = self.locks.lock();
        for key in keys {
            let key = key.as_ref();
            if let Some(lock) = locks.get_mut(key) {
                lock.shared.remove(&txn);
                if lock.exclusive == Some(txn) {
                    lock.exclusive = None;
                }
                Self::grant_waiters(lock);
                if lock.is_idle() {
                    locks.remove(key);
                }
            }
        }
        self.cond.notify_all();
    }

    /// Wait until `key` has no exclusive holder, without taking a lock
    ///
    /// Returns immediately when the key is free or only shared-held.
    ///
    /// # Errors
    /// Fails with [`Error::LockTimeout`] when an exclusive holder remains
    /// past `timeout`.
    pub fn wait_unlock(&self, key: &str, timeout: Duration) -> Result<()> {
        let mut locks = self.locks.lock();
        let deadline = Instant::now() + timeout;
        loop {
            let exclusively_held = locks.get(key).is_some_and(|l| l.exclusive.is_some());
            if !exclusively_held {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(key, timeout));
            }
            self.cond.wait_for(&mut locks, deadline - now);
        }
    }

    /// Cancel every queued wait owned by `txn`
    ///
    /// In-flight `acquire` calls of the transaction fail with
    /// [`Error::LockTimeout`]; grants already held are untouched.
    pub fn cancel(&self, txn: TxnId) {
        let locks = self.locks.lock();
        for lock in locks.values() {
            for waiter in &lock.waiters {
                if waiter.txn == txn {
                    waiter.state.store(CANCELLED, Ordering::Release);
                }
            }
        }
        drop(locks);
        self.cond.notify_all();
    }

    /// Whether any transaction holds `key` exclusively
    pub fn is_exclusively_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|l| l.exclusive.is_some())
    }

    /// Number of shared holders of `key`
    pub fn shared_holder_count(&self, key: &str) -> usize {
        self.locks.lock().get(key).map_or(0, |l| l.shared.len())
    }

    fn timeout_error(&self, key: &str, timeout: Duration) -> Error {
        Error::LockTimeout {
            key: key.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn remove_waiter(
        &self,
        locks: &mut HashMap<String, KeyLock>,
        key: &str,
        waiter: &Arc<Waiter>,
    ) {
        if let Some(lock) = locks.get_mut(key) {
            lock.waiters.retain(|w| !Arc::ptr_eq(w, waiter));
            // Our departure may unblock waiters queued behind us
            Self::grant_waiters(lock);
            if lock.is_idle() {
                locks.remove(key);
            }
            self.cond.notify_all();
        }
    }

    /// Drain the front of the queue while grants are compatible
    fn grant_waiters(lock: &mut KeyLock) {
        while let Some(head) = lock.waiters.front() {
            if head.state.load(Ordering::Acquire) == CANCELLED {
                lock.waiters.pop_front();
                continue;
            }
            match head.mode {
                LockMode::Exclusive => {
                    if lock.shared.is_empty() && lock.exclusive.is_none() {
                        let w = lock.waiters.pop_front().expect("front checked");
                        lock.exclusive = Some(w.txn);
                        w.state.store(GRANTED, Ordering::Release);
                    }
                    // An exclusive grant (or an incompatible head) stops the drain
                    break;
                }
                LockMode::Shared => {
                    if lock.exclusive.is_some() {
                        break;
                    }
                    let w = lock.waiters.pop_front().expect("front checked");
                    lock.shared.insert(w.txn);
                    w.state.store(GRANTED, Ordering::Release);
                }
            }
        }
    }
}

impl std::fmt::Debug for RecordLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locks = self.locks.lock();
        f.debug_struct("RecordLockManager")
            .field("keys", &locks.len())
            .finish()
    }
}
