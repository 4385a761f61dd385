use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use keel_types::{Record, RecordKey, TypeTag};
use tracing::warn;

use crate::error::{TableError, TableResult};
use crate::scan::RecordScan;
use crate::traits::ObjectTable;

type TypeMap = HashMap<TypeTag, HashMap<RecordKey, Record>>;

/// In-memory, HashMap-based object table.
///
/// Records are grouped per type so that scans only touch one type's map.
/// Everything sits behind a single `RwLock`; records are cloned on read.
/// This backend performs no transaction checks of its own.
pub struct InMemoryTable {
    records: RwLock<TypeMap>,
}

impl InMemoryTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of records across all types.
    ///
    /// A poisoned lock is logged and counts as empty.
    pub fn len(&self) -> usize {
        match self.read_map() {
            Ok(map) => map.values().map(HashMap::len).sum(),
            Err(e) => {
                warn!(error = %e, "cannot count records");
                0
            }
        }
    }

    /// Returns `true` if the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record of every type.
    pub fn clear(&self) -> TableResult<()> {
        self.write_map()?.clear();
        Ok(())
    }

    fn read_map(&self) -> TableResult<RwLockReadGuard<'_, TypeMap>> {
        self.records
            .read()
            .map_err(|e| TableError::LockPoisoned(e.to_string()))
    }

    fn write_map(&self) -> TableResult<RwLockWriteGuard<'_, TypeMap>> {
        self.records
            .write()
            .map_err(|e| TableError::LockPoisoned(e.to_string()))
    }
}

impl Default for InMemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTable for InMemoryTable {
    fn put(&self, record: Record) -> TableResult<Option<Record>> {
        let mut map = self.write_map()?;
        let by_key = map.entry(record.type_tag.clone()).or_default();
        Ok(by_key.insert(record.key.clone(), record))
    }

    fn delete(&self, type_tag: &TypeTag, key: &RecordKey) -> TableResult<Option<Record>> {
        let mut map = self.write_map()?;
        let Some(by_key) = map.get_mut(type_tag) else {
            return Ok(None);
        };
        let removed = by_key.remove(key);
        if by_key.is_empty() {
            map.remove(type_tag);
        }
        Ok(removed)
    }

    fn get(&self, type_tag: &TypeTag, key: &RecordKey) -> TableResult<Option<Record>> {
        let map = self.read_map()?;
        Ok(map.get(type_tag).and_then(|by_key| by_key.get(key)).cloned())
    }

    fn scan(&self, type_tag: &TypeTag) -> TableResult<RecordScan> {
        let map = self.read_map()?;
        let mut records: Vec<Record> = map
            .get(type_tag)
            .map(|by_key| by_key.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(RecordScan::new(type_tag.clone(), records))
    }

    fn count(&self, type_tag: &TypeTag) -> TableResult<usize> {
        let map = self.read_map()?;
        Ok(map.get(type_tag).map_or(0, HashMap::len))
    }

    fn type_tags(&self) -> TableResult<Vec<TypeTag>> {
        let map = self.read_map()?;
        let mut tags: Vec<TypeTag> = map.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }
}

impl std::fmt::Debug for InMemoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTable")
            .field("record_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::FieldMap;
    use proptest::prelude::*;
    use serde_json::json;

    fn session_tag() -> TypeTag {
        TypeTag::new("Session").unwrap()
    }

    fn session(key: &str, expired: bool) -> Record {
        let mut fields = FieldMap::new();
        fields.insert("id".into(), json!(key));
        fields.insert("expired".into(), json!(expired));
        Record::new(session_tag(), RecordKey::from(key), fields)
    }

    fn counter(key: i64, value: i64) -> Record {
        let mut fields = FieldMap::new();
        fields.insert("value".into(), json!(value));
        Record::new(TypeTag::new("Counter").unwrap(), RecordKey::from(key), fields)
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn put_and_get() {
        let table = InMemoryTable::new();
        let record = session("s1", false);
        assert!(table.put(record.clone()).unwrap().is_none());

        let read_back = table
            .get(&session_tag(), &RecordKey::from("s1"))
            .unwrap()
            .expect("should exist");
        assert_eq!(read_back, record);
    }

    #[test]
    fn put_replaces_same_identity() {
        let table = InMemoryTable::new();
        table.put(session("s1", false)).unwrap();
        let previous = table.put(session("s1", true)).unwrap().expect("replaced");
        assert_eq!(previous.field("expired"), Some(&json!(false)));

        assert_eq!(table.len(), 1);
        let current = table.get(&session_tag(), &RecordKey::from("s1")).unwrap().unwrap();
        assert_eq!(current.field("expired"), Some(&json!(true)));
    }

    #[test]
    fn same_key_in_different_types_does_not_collide() {
        let table = InMemoryTable::new();
        table.put(counter(1, 10)).unwrap();
        let mut other = counter(1, 20);
        other.type_tag = TypeTag::new("Gauge").unwrap();
        table.put(other).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn get_missing_returns_none() {
        let table = InMemoryTable::new();
        assert!(table.get(&session_tag(), &RecordKey::from("nope")).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    #[test]
    fn delete_present_record() {
        let table = InMemoryTable::new();
        table.put(session("s1", false)).unwrap();
        let removed = table.delete(&session_tag(), &RecordKey::from("s1")).unwrap();
        assert!(removed.is_some());
        assert!(table.get(&session_tag(), &RecordKey::from("s1")).unwrap().is_none());
        assert!(table.delete(&session_tag(), &RecordKey::from("s1")).unwrap().is_none());
    }

    #[test]
    fn delete_missing_is_noop() {
        let table = InMemoryTable::new();
        table.put(session("s1", false)).unwrap();
        assert!(table.delete(&session_tag(), &RecordKey::from("s9")).unwrap().is_none());
        assert!(table
            .delete(&TypeTag::new("Unknown").unwrap(), &RecordKey::from(1))
            .unwrap()
            .is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn deleting_last_record_drops_the_type() {
        let table = InMemoryTable::new();
        table.put(session("s1", false)).unwrap();
        table.delete(&session_tag(), &RecordKey::from("s1")).unwrap();
        assert!(table.type_tags().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    #[test]
    fn scan_is_sorted_by_key() {
        let table = InMemoryTable::new();
        for key in [3, 1, 2] {
            table.put(counter(key, 0)).unwrap();
        }
        let keys: Vec<_> = table
            .scan(&TypeTag::new("Counter").unwrap())
            .unwrap()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec![RecordKey::from(1), RecordKey::from(2), RecordKey::from(3)]);
    }

    #[test]
    fn scan_is_a_snapshot() {
        let table = InMemoryTable::new();
        table.put(session("s1", false)).unwrap();
        let scan = table.scan(&session_tag()).unwrap();

        table.put(session("s2", false)).unwrap();
        table.delete(&session_tag(), &RecordKey::from("s1")).unwrap();

        let keys: Vec<_> = scan.map(|r| r.key).collect();
        assert_eq!(keys, vec![RecordKey::from("s1")]);
    }

    #[test]
    fn scan_of_unknown_type_is_empty() {
        let table = InMemoryTable::new();
        assert_eq!(table.scan(&session_tag()).unwrap().len(), 0);
        assert_eq!(table.count(&session_tag()).unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Utility methods
    // -----------------------------------------------------------------------

    #[test]
    fn len_is_empty_and_clear() {
        let table = InMemoryTable::new();
        assert!(table.is_empty());
        table.put(session("s1", false)).unwrap();
        table.put(counter(1, 0)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.count(&session_tag()).unwrap(), 1);

        table.clear().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn type_tags_are_sorted() {
        let table = InMemoryTable::new();
        table.put(session("s1", false)).unwrap();
        table.put(counter(1, 0)).unwrap();
        let tags: Vec<String> = table
            .type_tags()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(tags, vec!["Counter".to_string(), "Session".to_string()]);
    }

    #[test]
    fn backend_is_always_writable() {
        assert!(InMemoryTable::new().is_writable());
    }

    #[test]
    fn debug_format() {
        let table = InMemoryTable::new();
        table.put(session("s1", false)).unwrap();
        let debug = format!("{table:?}");
        assert!(debug.contains("InMemoryTable"));
        assert!(debug.contains("record_count"));
    }

    // -----------------------------------------------------------------------
    // Concurrent read safety
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(InMemoryTable::new());
        table.put(session("shared", false)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let found = table.get(&session_tag(), &RecordKey::from("shared")).unwrap();
                    assert!(found.is_some());
                })
            })
            .collect();

        for h in handles {
            h.join().expect("thread should not panic");
        }
    }

    // -----------------------------------------------------------------------
    // Poisoned lock
    // -----------------------------------------------------------------------

    #[test]
    fn poisoned_lock_is_reported() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(InMemoryTable::new());
        table.put(session("s1", false)).unwrap();

        let poisoner = Arc::clone(&table);
        let result = thread::spawn(move || {
            let _guard = poisoner.records.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(table.len(), 0);
        assert!(matches!(
            table.get(&session_tag(), &RecordKey::from("s1")),
            Err(TableError::LockPoisoned(_))
        ));
        assert!(matches!(table.clear(), Err(TableError::LockPoisoned(_))));
    }

    // -----------------------------------------------------------------------
    // Uniqueness: latest write wins
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn at_most_one_record_per_key(writes in proptest::collection::vec((0i64..16, any::<i64>()), 0..64)) {
            let table = InMemoryTable::new();
            let mut expected = HashMap::new();
            for (key, value) in &writes {
                table.put(counter(*key, *value)).unwrap();
                expected.insert(*key, *value);
            }

            let tag = TypeTag::new("Counter").unwrap();
            prop_assert_eq!(table.count(&tag).unwrap(), expected.len());
            for (key, value) in expected {
                let record = table.get(&tag, &RecordKey::from(key)).unwrap().unwrap();
                prop_assert_eq!(record.field("value"), Some(&json!(value)));
            }
        }
    }
}
