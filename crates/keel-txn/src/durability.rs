//! Commit hand-off to a durability backend.
//!
//! How committed changes are stored is outside the transaction manager: it
//! only hands each committed [`ChangeSet`] to a [`Durability`] backend and
//! reports whether that succeeded.

use std::sync::Arc;

use keel_table::{ObjectTable, TableResult};
use parking_lot::Mutex;
use tracing::debug;

use crate::change::{Change, ChangeSet};
use crate::error::DurabilityError;

/// Receives the change set of every committed transaction.
pub trait Durability: Send + Sync {
    /// Persist one committed change set.
    fn persist(&self, changes: &ChangeSet) -> Result<(), DurabilityError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

impl<D: Durability + ?Sized> Durability for Arc<D> {
    fn persist(&self, changes: &ChangeSet) -> Result<(), DurabilityError> {
        (**self).persist(changes)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Keeps nothing. Commits always succeed.
#[derive(Clone, Copy, Debug, Default)]
pub struct Volatile;

impl Durability for Volatile {
    fn persist(&self, _changes: &ChangeSet) -> Result<(), DurabilityError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "volatile"
    }
}

/// Keeps every committed change set in memory, in commit order.
///
/// The journal can be replayed into an empty table to rebuild the committed
/// state.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    batches: Mutex<Vec<ChangeSet>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed change sets.
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }

    /// Copy of all committed change sets.
    pub fn batches(&self) -> Vec<ChangeSet> {
        self.batches.lock().clone()
    }

    /// Apply every journaled change, oldest first. Returns the number of
    /// changes applied.
    pub fn replay_into(&self, table: &dyn ObjectTable) -> TableResult<usize> {
        let batches = self.batches.lock();
        let mut applied = 0;
        for batch in batches.iter() {
            for change in &batch.changes {
                match change {
                    Change::Put { record } => {
                        table.put(record.clone())?;
                    }
                    Change::Delete { id } => {
                        table.delete(&id.type_tag, &id.key)?;
                    }
                }
                applied += 1;
            }
        }
        debug!(batches = batches.len(), applied, "journal replayed");
        Ok(applied)
    }
}

impl Durability for MemoryJournal {
    fn persist(&self, changes: &ChangeSet) -> Result<(), DurabilityError> {
        self.batches.lock().push(changes.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory-journal"
    }
}
