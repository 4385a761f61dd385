use std::sync::Arc;

use keel_types::{Record, TypeTag};

/// Snapshot of the records of one type.
///
/// The snapshot is shared and immutable, so cloning a scan or calling
/// [`RecordScan::restart`] is cheap and always yields the same sequence.
#[derive(Clone, Debug)]
pub struct RecordScan {
    type_tag: TypeTag,
    records: Arc<[Record]>,
    position: usize,
}

impl RecordScan {
    /// Build a scan over `records`, which must already be in key order.
    pub fn new(type_tag: TypeTag, records: Vec<Record>) -> Self {
        Self {
            type_tag,
            records: records.into(),
            position: 0,
        }
    }

    /// An empty scan.
    pub fn empty(type_tag: TypeTag) -> Self {
        Self::new(type_tag, Vec::new())
    }

    /// The scanned type.
    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    /// Rewind to the first record of the snapshot.
    pub fn restart(&mut self) {
        self.position = 0;
    }

    /// Total records in the snapshot, regardless of position.
    pub fn snapshot_len(&self) -> usize {
        self.records.len()
    }
}

impl Iterator for RecordScan {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let record = self.records.get(self.position)?.clone();
        self.position += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.records.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RecordScan {}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{FieldMap, RecordKey};

    fn record(key: i64) -> Record {
        Record::new(TypeTag::new("T").unwrap(), RecordKey::from(key), FieldMap::new())
    }

    #[test]
    fn scan_is_restartable() {
        let mut scan = RecordScan::new(TypeTag::new("T").unwrap(), vec![record(1), record(2)]);
        assert_eq!(scan.next().unwrap().key, RecordKey::from(1));
        assert_eq!(scan.len(), 1);
        scan.restart();
        let keys: Vec<_> = scan.map(|r| r.key).collect();
        assert_eq!(keys, vec![RecordKey::from(1), RecordKey::from(2)]);
    }

    #[test]
    fn clones_iterate_independently() {
        let mut scan = RecordScan::new(TypeTag::new("T").unwrap(), vec![record(1), record(2)]);
        scan.next();
        let copy = scan.clone();
        assert_eq!(copy.count(), 1);
        assert_eq!(scan.snapshot_len(), 2);
    }

    #[test]
    fn empty_scan_yields_nothing() {
        let mut scan = RecordScan::empty(TypeTag::new("T").unwrap());
        assert!(scan.next().is_none());
        assert_eq!(scan.len(), 0);
    }
}
