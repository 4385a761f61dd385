use keel_table::TableError;

use crate::change::TxnId;

/// Failure reported by a durability backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurabilityError {
    /// The backend could not be reached or written.
    #[error("durability backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the change set.
    #[error("change set rejected: {0}")]
    Rejected(String),
}

/// Errors from transaction operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxnError {
    /// Commit or cancel was requested with no open transaction.
    #[error("no transaction is open")]
    NotOpen,

    /// The change set could not be persisted. Table writes stay applied.
    #[error("commit of {txn} failed: {source}")]
    CommitFailed {
        txn: TxnId,
        #[source]
        source: DurabilityError,
    },

    /// Error from the underlying object table.
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

/// Result alias for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;
