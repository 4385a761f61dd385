use keel_table::TableError;
use keel_types::{TypeError, TypeTag};

/// Errors raised by the disposal registry and by user predicates and hooks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisposeError {
    /// A type can only be registered once.
    #[error("type '{0}' is already registered for disposal")]
    AlreadyRegistered(TypeTag),

    /// Sweeps mutate the table and need an open transaction.
    #[error("sweep requires an open transaction")]
    NoOpenTransaction,

    /// A predicate could not decide on a record.
    #[error("predicate failed: {0}")]
    Predicate(String),

    /// A pre-delete hook failed; the record is kept.
    #[error("pre-delete hook failed: {0}")]
    Hook(String),

    /// A declarative rule is malformed.
    #[error("invalid disposal rule: {0}")]
    InvalidRule(String),

    /// A record could not be decoded into the registered entity type.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Error from the underlying object table.
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

impl DisposeError {
    /// Build a hook failure from any displayable message.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }
}

/// Result alias for disposal operations.
pub type DisposeResult<T> = Result<T, DisposeError>;
