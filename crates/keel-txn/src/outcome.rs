use crate::change::CommitReceipt;
use crate::error::TxnError;

/// Result of a write run through [`TransactionManager::run_write`].
///
/// Writes never fail with `Err`: a failing body or commit is logged and
/// reported here instead.
///
/// [`TransactionManager::run_write`]: crate::TransactionManager::run_write
#[derive(Debug)]
pub enum WriteOutcome<R> {
    /// The body succeeded and its transaction committed.
    Committed { value: R, receipt: CommitReceipt },

    /// The body ran inline inside an already open transaction. Nothing was
    /// committed yet; the outermost write decides.
    Nested { value: R },

    /// The body succeeded but the commit failed. The body's writes remain
    /// applied to the table.
    CommitFailed { value: R, error: TxnError },

    /// The body returned an error. Depending on the body error policy the
    /// writes applied before the failure were committed (`receipt` is set
    /// when that commit succeeded) or rolled back.
    BodyFailed {
        error: String,
        receipt: Option<CommitReceipt>,
        rolled_back: bool,
    },
}

impl<R> WriteOutcome<R> {
    /// The body's value, if it produced one.
    pub fn value(self) -> Option<R> {
        match self {
            Self::Committed { value, .. }
            | Self::Nested { value }
            | Self::CommitFailed { value, .. } => Some(value),
            Self::BodyFailed { .. } => None,
        }
    }

    /// `true` if the body succeeded and its transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Self::Nested { .. })
    }

    /// Description of whatever went wrong, if anything.
    pub fn error(&self) -> Option<String> {
        match self {
            Self::CommitFailed { error, .. } => Some(error.to_string()),
            Self::BodyFailed { error, .. } => Some(error.clone()),
            _ => None,
        }
    }
}
