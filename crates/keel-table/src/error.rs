/// Errors from object table operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A mutation was attempted while no transaction is open.
    #[error("cannot {operation} outside an open transaction")]
    NotInTransaction { operation: &'static str },

    /// A lock guarding the table was poisoned by a panicking writer.
    #[error("table lock poisoned: {0}")]
    LockPoisoned(String),

    /// Failure reported by a storage backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for table operations.
pub type TableResult<T> = Result<T, TableError>;
