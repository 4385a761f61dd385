use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Instant;

use keel_table::{ObjectTable, RecordScan, TableError, TableResult};
use keel_types::{Record, RecordId, RecordKey, TypeTag};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::change::{CancelReceipt, Change, ChangeSet, CommitReceipt, TxnId};
use crate::durability::{Durability, Volatile};
use crate::error::{TxnError, TxnResult};
use crate::outcome::WriteOutcome;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of the manager's transaction slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    /// No transaction; the table is read-only.
    Idle,
    /// A transaction is open; its owner may mutate the table.
    Open,
    /// The change set is being handed to the durability backend.
    Committing,
    /// Pre-images are being restored.
    Cancelled,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Committing => "committing",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What to do with a transaction whose outermost write body returned an
/// error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyErrorPolicy {
    /// Commit whatever the body applied before failing.
    #[default]
    Commit,
    /// Cancel the transaction, restoring every touched record.
    Rollback,
}

/// Counters since the manager was created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxnStats {
    pub begun: u64,
    pub committed: u64,
    pub commit_failures: u64,
    pub cancelled: u64,
    pub nested: u64,
}

#[derive(Default)]
struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    commit_failures: AtomicU64,
    cancelled: AtomicU64,
    nested: AtomicU64,
}

struct OpenTxn {
    id: TxnId,
    owner: ThreadId,
    started: Instant,
    /// First pre-image of every touched identity, in touch order.
    undo: Vec<(RecordId, Option<Record>)>,
    touched: HashSet<RecordId>,
    changes: ChangeSet,
}

struct Slot {
    state: TxnState,
    open: Option<OpenTxn>,
}

// ---------------------------------------------------------------------------
// TransactionManager
// ---------------------------------------------------------------------------

/// Single-writer transaction manager over an object table.
///
/// Writers are serialized by a reentrant gate: a thread that holds it may
/// re-enter (nested writes), every other thread waits. Mutations are only
/// accepted from the thread that owns the open transaction. Reads never
/// need a transaction.
///
/// The manager itself implements [`ObjectTable`], so code that only knows
/// the table contract can run inside a transaction unchanged.
pub struct TransactionManager<T: ObjectTable> {
    table: T,
    gate: ReentrantMutex<()>,
    slot: Mutex<Slot>,
    durability: Box<dyn Durability>,
    policy: BodyErrorPolicy,
    counters: Counters,
}

impl<T: ObjectTable> TransactionManager<T> {
    /// Create a manager whose commits are not persisted anywhere.
    pub fn new(table: T) -> Self {
        Self::with_durability(table, Box::new(Volatile))
    }

    /// Create a manager that hands committed change sets to `durability`.
    pub fn with_durability(table: T, durability: Box<dyn Durability>) -> Self {
        Self {
            table,
            gate: ReentrantMutex::new(()),
            slot: Mutex::new(Slot {
                state: TxnState::Idle,
                open: None,
            }),
            durability,
            policy: BodyErrorPolicy::default(),
            counters: Counters::default(),
        }
    }

    /// Set the policy applied when a write body fails.
    pub fn with_body_error_policy(mut self, policy: BodyErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn body_error_policy(&self) -> BodyErrorPolicy {
        self.policy
    }

    /// The wrapped table, bypassing transaction checks.
    pub fn backend(&self) -> &T {
        &self.table
    }

    pub fn state(&self) -> TxnState {
        self.slot.lock().state
    }

    /// `true` while any thread has a transaction open.
    pub fn is_open(&self) -> bool {
        self.slot.lock().open.is_some()
    }

    /// Id of the open transaction, if any.
    pub fn current_txn(&self) -> Option<TxnId> {
        self.slot.lock().open.as_ref().map(|open| open.id)
    }

    pub fn stats(&self) -> TxnStats {
        TxnStats {
            begun: self.counters.begun.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            commit_failures: self.counters.commit_failures.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            nested: self.counters.nested.load(Ordering::Relaxed),
        }
    }

    /// Acquire the writer gate.
    ///
    /// Blocks while another thread holds a session. The owning thread may
    /// open further sessions; they share the same transaction.
    pub fn session(&self) -> WriteSession<'_, T> {
        WriteSession {
            manager: self,
            began: Cell::new(None),
            _gate: self.gate.lock(),
        }
    }

    /// Run `body` in a transaction. See [`Self::run_write_with`].
    pub fn run_write<R, E, F>(&self, body: F) -> WriteOutcome<R>
    where
        F: FnOnce(&Self) -> Result<R, E>,
        E: fmt::Display,
    {
        self.run_write_with(body, |_| {})
    }

    /// Run `body` in a transaction, then `pre_commit`, then commit.
    ///
    /// If a transaction is already open on this thread, `body` runs inline
    /// and neither `pre_commit` nor commit happen here: the outermost write
    /// owns them. Failures are logged and reported in the returned
    /// [`WriteOutcome`], never raised.
    pub fn run_write_with<R, E, F, P>(&self, body: F, pre_commit: P) -> WriteOutcome<R>
    where
        F: FnOnce(&Self) -> Result<R, E>,
        E: fmt::Display,
        P: FnOnce(&Self),
    {
        let session = self.session();

        if session.is_open() {
            self.counters.nested.fetch_add(1, Ordering::Relaxed);
            debug!(txn = ?self.current_txn(), "nested write reuses open transaction");
            return match body(self) {
                Ok(value) => WriteOutcome::Nested { value },
                Err(e) => {
                    warn!(error = %e, "nested write body failed");
                    WriteOutcome::BodyFailed {
                        error: e.to_string(),
                        receipt: None,
                        rolled_back: false,
                    }
                }
            };
        }

        let txn = session.begin();
        match body(self) {
            Ok(value) => {
                pre_commit(self);
                match session.commit() {
                    Ok(receipt) => WriteOutcome::Committed { value, receipt },
                    Err(error) => WriteOutcome::CommitFailed { value, error },
                }
            }
            Err(e) => {
                let error = e.to_string();
                warn!(%txn, error = %error, policy = ?self.policy, "write body failed");
                match self.policy {
                    BodyErrorPolicy::Rollback => WriteOutcome::BodyFailed {
                        error,
                        receipt: None,
                        rolled_back: session.cancel().is_ok(),
                    },
                    BodyErrorPolicy::Commit => WriteOutcome::BodyFailed {
                        error,
                        receipt: session.commit().ok(),
                        rolled_back: false,
                    },
                }
            }
        }
    }

    fn begin_inner(&self) -> TxnId {
        let mut slot = self.slot.lock();
        if let Some(open) = &slot.open {
            debug!(txn = %open.id, "begin while open; reusing transaction");
            return open.id;
        }

        let id = TxnId::new();
        slot.open = Some(OpenTxn {
            id,
            owner: thread::current().id(),
            started: Instant::now(),
            undo: Vec::new(),
            touched: HashSet::new(),
            changes: ChangeSet::new(id),
        });
        slot.state = TxnState::Open;
        self.counters.begun.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %id, "transaction opened");
        id
    }

    fn commit_inner(&self) -> TxnResult<CommitReceipt> {
        let open = {
            let mut slot = self.slot.lock();
            let open = slot.open.take().ok_or(TxnError::NotOpen)?;
            slot.state = TxnState::Committing;
            open
        };

        let result = self.durability.persist(&open.changes);
        self.slot.lock().state = TxnState::Idle;

        match result {
            Ok(()) => {
                self.counters.committed.fetch_add(1, Ordering::Relaxed);
                let receipt = CommitReceipt {
                    txn: open.id,
                    puts: open.changes.puts(),
                    deletes: open.changes.deletes(),
                    elapsed: open.started.elapsed(),
                };
                debug!(
                    txn = %receipt.txn,
                    puts = receipt.puts,
                    deletes = receipt.deletes,
                    "transaction committed"
                );
                Ok(receipt)
            }
            Err(source) => {
                self.counters.commit_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    txn = %open.id,
                    backend = self.durability.name(),
                    error = %source,
                    "commit failed; applied writes are kept"
                );
                Err(TxnError::CommitFailed {
                    txn: open.id,
                    source,
                })
            }
        }
    }

    fn cancel_inner(&self) -> TxnResult<CancelReceipt> {
        let open = {
            let mut slot = self.slot.lock();
            let open = slot.open.take().ok_or(TxnError::NotOpen)?;
            slot.state = TxnState::Cancelled;
            open
        };

        let mut restored = 0;
        for (id, pre_image) in open.undo.into_iter().rev() {
            let result = match pre_image {
                Some(record) => self.table.put(record).map(drop),
                None => self.table.delete(&id.type_tag, &id.key).map(drop),
            };
            match result {
                Ok(()) => restored += 1,
                Err(e) => warn!(txn = %open.id, record = %id, error = %e, "failed to restore record"),
            }
        }

        self.slot.lock().state = TxnState::Idle;
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %open.id, restored, "transaction cancelled");
        Ok(CancelReceipt {
            txn: open.id,
            restored,
        })
    }

    /// The open transaction, if the calling thread owns it.
    fn owned<'s>(slot: &'s mut Slot, operation: &'static str) -> TableResult<&'s mut OpenTxn> {
        let current = thread::current().id();
        match slot.open.as_mut() {
            Some(open) if slot.state == TxnState::Open && open.owner == current => Ok(open),
            _ => Err(TableError::NotInTransaction { operation }),
        }
    }
}

impl<T: ObjectTable> ObjectTable for TransactionManager<T> {
    fn put(&self, record: Record) -> TableResult<Option<Record>> {
        let mut slot = self.slot.lock();
        let open = Self::owned(&mut slot, "put")?;

        let id = record.id();
        let previous = self.table.put(record.clone())?;
        if open.touched.insert(id.clone()) {
            open.undo.push((id, previous.clone()));
        }
        open.changes.changes.push(Change::Put { record });
        Ok(previous)
    }

    fn delete(&self, type_tag: &TypeTag, key: &RecordKey) -> TableResult<Option<Record>> {
        let mut slot = self.slot.lock();
        let open = Self::owned(&mut slot, "delete")?;

        let removed = self.table.delete(type_tag, key)?;
        if let Some(record) = &removed {
            let id = record.id();
            if open.touched.insert(id.clone()) {
                open.undo.push((id.clone(), Some(record.clone())));
            }
            open.changes.changes.push(Change::Delete { id });
        }
        Ok(removed)
    }

    fn get(&self, type_tag: &TypeTag, key: &RecordKey) -> TableResult<Option<Record>> {
        self.table.get(type_tag, key)
    }

    fn scan(&self, type_tag: &TypeTag) -> TableResult<RecordScan> {
        self.table.scan(type_tag)
    }

    fn count(&self, type_tag: &TypeTag) -> TableResult<usize> {
        self.table.count(type_tag)
    }

    fn type_tags(&self) -> TableResult<Vec<TypeTag>> {
        self.table.type_tags()
    }

    fn is_writable(&self) -> bool {
        let mut slot = self.slot.lock();
        Self::owned(&mut slot, "write").is_ok()
    }
}

impl<T: ObjectTable> fmt::Debug for TransactionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("state", &self.state())
            .field("durability", &self.durability.name())
            .field("policy", &self.policy)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WriteSession
// ---------------------------------------------------------------------------

/// Exclusive writer access to a [`TransactionManager`].
///
/// Holds the writer gate for its whole lifetime. A session that began a
/// transaction and is dropped while it is still open cancels it, so a
/// panicking writer never leaves the table mid-transaction.
pub struct WriteSession<'a, T: ObjectTable> {
    manager: &'a TransactionManager<T>,
    began: Cell<Option<TxnId>>,
    _gate: ReentrantMutexGuard<'a, ()>,
}

impl<'a, T: ObjectTable> WriteSession<'a, T> {
    /// Open a transaction, or return the id of the one already open.
    pub fn begin(&self) -> TxnId {
        let already_open = self.manager.current_txn().is_some();
        let id = self.manager.begin_inner();
        if !already_open {
            self.began.set(Some(id));
        }
        id
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> TxnResult<CommitReceipt> {
        self.began.set(None);
        self.manager.commit_inner()
    }

    /// Cancel the open transaction, restoring every touched record.
    pub fn cancel(&self) -> TxnResult<CancelReceipt> {
        self.began.set(None);
        self.manager.cancel_inner()
    }

    pub fn is_open(&self) -> bool {
        self.manager.is_open()
    }

    /// The manager, usable as an [`ObjectTable`] while the session is held.
    pub fn manager(&self) -> &'a TransactionManager<T> {
        self.manager
    }
}

impl<T: ObjectTable> Drop for WriteSession<'_, T> {
    fn drop(&mut self) {
        if let Some(id) = self.began.get() {
            if self.manager.current_txn() == Some(id) {
                warn!(txn = %id, "write session dropped with open transaction; cancelling");
                if let Err(e) = self.manager.cancel_inner() {
                    warn!(txn = %id, error = %e, "cancel on drop failed");
                }
            }
        }
    }
}
