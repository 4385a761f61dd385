use keel_dispose::DisposeError;
use keel_table::TableError;
use keel_txn::TxnError;
use keel_types::{ConstructError, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be constructed.
    #[error("store initialization failed: {0}")]
    Initialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A record constructor rejected its input. The enclosing transaction
    /// was cancelled.
    #[error("cannot construct {type_tag}: {source}")]
    Construction {
        type_tag: String,
        #[source]
        source: ConstructError,
    },

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("transaction error: {0}")]
    Txn(#[from] TxnError),

    #[error("disposal error: {0}")]
    Dispose(#[from] DisposeError),
}

impl StoreError {
    /// Log category: `parse` or `unknown` for construction failures, the
    /// variant name otherwise.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Initialization(_) => "initialization",
            Self::Config(_) => "config",
            Self::Construction { source, .. } => source.category(),
            Self::Type(_) => "type",
            Self::Table(_) => "table",
            Self::Txn(_) => "transaction",
            Self::Dispose(_) => "disposal",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
