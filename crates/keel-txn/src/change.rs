use std::fmt;
use std::time::Duration;

use keel_types::{Record, RecordId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one transaction (UUID v7, so ids sort by start time).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// One mutation applied inside a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Put { record: Record },
    Delete { id: RecordId },
}

impl Change {
    /// Identity the change applies to.
    pub fn id(&self) -> RecordId {
        match self {
            Self::Put { record } => record.id(),
            Self::Delete { id } => id.clone(),
        }
    }
}

/// Ordered mutations of one transaction, handed to the durability backend
/// on commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub txn: TxnId,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(txn: TxnId) -> Self {
        Self {
            txn,
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn puts(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, Change::Put { .. }))
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.changes.len() - self.puts()
    }
}

/// Summary of a committed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub txn: TxnId,
    pub puts: usize,
    pub deletes: usize,
    /// Wall-clock time between begin and the end of commit.
    pub elapsed: Duration,
}

/// Summary of a cancelled transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelReceipt {
    pub txn: TxnId,
    /// Number of identities restored to their pre-transaction value.
    pub restored: usize,
}
