//! Single-writer transaction manager for Keel.
//!
//! The [`TransactionManager`] wraps an [`ObjectTable`] and only lets it be
//! mutated while a transaction is open. At most one transaction is open at a
//! time; a reentrant writer gate serializes writers across threads while
//! letting the owning thread nest writes, which reuse the open transaction.
//!
//! Every mutation records the pre-image of the identity it touches, so
//! [`WriteSession::cancel`] can restore the table. Commit hands the change
//! set to a [`Durability`] backend. A failed commit is logged and leaves the
//! applied writes in place: there is no rollback after a commit attempt.
//!
//! [`ObjectTable`]: keel_table::ObjectTable

pub mod change;
pub mod durability;
pub mod error;
pub mod manager;
pub mod outcome;

pub use change::{CancelReceipt, Change, ChangeSet, CommitReceipt, TxnId};
pub use durability::{Durability, MemoryJournal, Volatile};
pub use error::{DurabilityError, TxnError, TxnResult};
pub use manager::{BodyErrorPolicy, TransactionManager, TxnState, TxnStats, WriteSession};
pub use outcome::WriteOutcome;
