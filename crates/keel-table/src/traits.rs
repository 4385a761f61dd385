use keel_types::{Record, RecordKey, TypeTag};

use crate::error::TableResult;
use crate::scan::RecordScan;

/// Primary-key object table.
///
/// All implementations must satisfy these invariants:
/// - At most one record per `(type, key)`. `put` replaces any existing record
///   with the same identity.
/// - A `put` or `delete` is visible to every subsequent `get` and `scan`.
/// - `scan` returns a snapshot taken at the moment of the call.
/// - Reads are always allowed. Layers that gate mutation (transactions)
///   reject `put`/`delete` with [`TableError::NotInTransaction`] and report
///   it through [`ObjectTable::is_writable`].
///
/// [`TableError::NotInTransaction`]: crate::TableError::NotInTransaction
pub trait ObjectTable: Send + Sync {
    /// Insert or replace a record. Returns the record previously stored under
    /// the same identity.
    fn put(&self, record: Record) -> TableResult<Option<Record>>;

    /// Remove a record. Returns the removed record, or `None` if it was absent.
    fn delete(&self, type_tag: &TypeTag, key: &RecordKey) -> TableResult<Option<Record>>;

    /// Read a record by primary key.
    fn get(&self, type_tag: &TypeTag, key: &RecordKey) -> TableResult<Option<Record>>;

    /// Snapshot all records of one type.
    fn scan(&self, type_tag: &TypeTag) -> TableResult<RecordScan>;

    /// Number of records of one type.
    ///
    /// Default implementation takes a scan. Backends may override.
    fn count(&self, type_tag: &TypeTag) -> TableResult<usize> {
        Ok(self.scan(type_tag)?.len())
    }

    /// All types that currently hold at least one record, sorted.
    fn type_tags(&self) -> TableResult<Vec<TypeTag>>;

    /// Whether `put` and `delete` would currently be accepted.
    fn is_writable(&self) -> bool {
        true
    }
}
