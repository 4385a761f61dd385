//! Store facade for Keel.
//!
//! A [`Store`] ties together one object table, its single-writer
//! transaction manager and the disposal registry. [`Store::write`] is the
//! only way to mutate records: it runs the caller's body in a transaction,
//! sweeps disposable records in that same transaction when auto clean-up is
//! on, and commits. [`Store::read`] hands out a [`ReadView`] that cannot
//! mutate anything.
//!
//! # Quick Start
//!
//! ```rust
//! use keel_store::{Store, StoreResult};
//! use keel_types::{Entity, RecordKey};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Session {
//!     id: String,
//!     expired: bool,
//! }
//!
//! impl Entity for Session {
//!     const TYPE: &'static str = "Session";
//!     fn primary_key(&self) -> RecordKey {
//!         RecordKey::from(self.id.as_str())
//!     }
//! }
//!
//! let store = Store::builder()
//!     .register::<Session, _>(|s| s.expired)
//!     .build()
//!     .unwrap();
//!
//! store.write(|txn| -> StoreResult<()> {
//!     txn.put_entity(&Session { id: "a".into(), expired: false })?;
//!     txn.put_entity(&Session { id: "b".into(), expired: true })?;
//!     Ok(())
//! });
//!
//! assert_eq!(store.scan_entities::<Session>().unwrap().len(), 1);
//! ```
//!
//! # Design Rules
//!
//! 1. One store per process, passed by reference; there is no global.
//! 2. Nested writes join the open transaction and never commit or sweep.
//! 3. A failed commit is logged and its writes stay applied.
//! 4. A failed import cancels its transaction.

pub mod config;
pub mod error;
pub mod import;
pub mod store;

pub use config::{StoreConfig, TypeConfig, DEFAULT_CONFIG_FILE};
pub use error::{StoreError, StoreResult};
pub use store::{ReadView, Store, StoreBuilder, StoreStats, WriteTxn};

pub use keel_dispose::{FieldRule, RuleCondition, SweepReport};
pub use keel_txn::{BodyErrorPolicy, WriteOutcome};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use keel_types::{Entity, RecordKey, TypeTag};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        id: String,
        expired: bool,
    }

    impl Entity for Session {
        const TYPE: &'static str = "Session";

        fn primary_key(&self) -> RecordKey {
            RecordKey::from(self.id.as_str())
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: i64,
        value: i64,
    }

    impl Entity for Counter {
        const TYPE: &'static str = "Counter";

        fn primary_key(&self) -> RecordKey {
            RecordKey::from(self.id)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Upload {
        id: i64,
        done: bool,
    }

    impl Entity for Upload {
        const TYPE: &'static str = "Upload";

        fn primary_key(&self) -> RecordKey {
            RecordKey::from(self.id)
        }
    }

    fn session(id: &str, expired: bool) -> Session {
        Session {
            id: id.into(),
            expired,
        }
    }

    fn session_store() -> Store {
        Store::builder()
            .register::<Session, _>(|s| s.expired)
            .build()
            .unwrap()
    }

    fn seed_sessions(store: &Store) {
        store.set_auto_clean_up(false);
        store.write(|txn| -> StoreResult<()> {
            txn.put_entity(&session("s1", false))?;
            txn.put_entity(&session("s2", true))?;
            txn.put_entity(&session("s3", true))?;
            Ok(())
        });
        store.set_auto_clean_up(true);
    }

    // -----------------------------------------------------------------------
    // Scenario A: expired sessions are swept by the next write
    // -----------------------------------------------------------------------
    #[test]
    fn no_op_write_sweeps_expired_sessions() {
        let store = session_store();
        seed_sessions(&store);
        assert_eq!(store.scan_entities::<Session>().unwrap().len(), 3);

        let outcome = store.write(|_| Ok::<_, StoreError>(()));
        assert!(outcome.is_committed());

        let remaining = store.scan_entities::<Session>().unwrap();
        assert_eq!(remaining, vec![session("s1", false)]);
    }

    // -----------------------------------------------------------------------
    // Scenario B: a failing body keeps its earlier writes
    // -----------------------------------------------------------------------
    #[test]
    fn failing_body_keeps_earlier_put() {
        let store = session_store();
        let outcome = store.write(|txn| -> StoreResult<()> {
            txn.put_entity(&session("kept", true))?;
            Err(StoreError::Config("body gave up".into()))
        });

        assert!(!outcome.is_committed());
        assert!(outcome.error().unwrap().contains("body gave up"));
        // Committed without a sweep, so even the disposable record survives.
        assert!(store.get_entity::<Session>("kept").unwrap().is_some());
        assert_eq!(store.stats().txn.committed, 1);
        assert_eq!(store.stats().sweeps, 0);
    }

    #[test]
    fn failing_body_rolls_back_when_configured() {
        let store = Store::builder()
            .body_error_policy(BodyErrorPolicy::Rollback)
            .build()
            .unwrap();
        store.write(|txn| -> StoreResult<()> {
            txn.put_entity(&session("gone", false))?;
            Err(StoreError::Config("body gave up".into()))
        });
        assert!(store.get_entity::<Session>("gone").unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Scenario C / P2: concurrent writers are serialized
    // -----------------------------------------------------------------------
    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(Store::in_memory());
        store.write(|txn| txn.put_entity(&Counter { id: 1, value: 0 }));

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        store.write(|txn| -> StoreResult<()> {
                            let mut counter = txn
                                .get_entity::<Counter>(1)?
                                .unwrap_or(Counter { id: 1, value: 0 });
                            thread::yield_now();
                            counter.value += 1;
                            txn.put_entity(&counter)
                        });
                    }
                })
            })
            .collect();

        for w in writers {
            w.join().expect("writer thread should not panic");
        }
        let counter = store.get_entity::<Counter>(1).unwrap().unwrap();
        assert_eq!(counter.value, 2000);
    }

    // -----------------------------------------------------------------------
    // P1: one record per identity, latest write wins
    // -----------------------------------------------------------------------
    #[test]
    fn latest_write_wins() {
        let store = Store::in_memory();
        store.write(|txn| txn.put_entity(&Counter { id: 1, value: 1 }));
        store.write(|txn| txn.put_entity(&Counter { id: 1, value: 2 }));

        let counters = store.scan_entities::<Counter>().unwrap();
        assert_eq!(counters, vec![Counter { id: 1, value: 2 }]);
    }

    // -----------------------------------------------------------------------
    // P3: nested writes reuse the transaction and do not sweep
    // -----------------------------------------------------------------------
    #[test]
    fn nested_write_neither_commits_nor_sweeps() {
        let store = session_store();
        let outer_txn = Arc::new(std::sync::Mutex::new(None));
        let seen = Arc::clone(&outer_txn);

        let outcome = store.write(|txn| -> StoreResult<()> {
            *seen.lock().unwrap() = txn.id();
            let inner = txn.store().write(|inner| -> StoreResult<()> {
                assert_eq!(inner.id(), txn.id());
                inner.put_entity(&session("nested", true))?;
                // No sweep ran yet: the nested write did not trigger one.
                assert!(inner.get_entity::<Session>("nested")?.is_some());
                Ok(())
            });
            assert!(inner.is_nested());
            assert_eq!(txn.store().stats().sweeps, 0);
            Ok(())
        });

        assert!(outcome.is_committed());
        let stats = store.stats();
        assert_eq!(stats.txn.begun, 1);
        assert_eq!(stats.txn.committed, 1);
        assert_eq!(stats.sweeps, 1);
        assert!(outer_txn.lock().unwrap().is_some());
        assert!(store.get_entity::<Session>("nested").unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // P4 / P5: exact subset removed, hooks once each, registration order
    // -----------------------------------------------------------------------
    #[test]
    fn sweep_visits_types_in_registration_order() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&hook_calls);
        let store = Store::builder()
            .register::<Upload, _>(|u| u.done)
            .register_with_hook::<Session, _, _>(
                |s| s.expired,
                move |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .build()
            .unwrap();

        store.write(|txn| -> StoreResult<()> {
            txn.put_entity(&session("s1", true))?;
            txn.put_entity(&session("s2", false))?;
            txn.put_entity(&Upload { id: 1, done: true })?;
            txn.put_entity(&Upload { id: 2, done: false })?;
            Ok(())
        });

        let report = store.last_sweep().unwrap();
        assert_eq!(report.visited, vec![Upload::type_tag(), Session::type_tag()]);
        assert_eq!(report.disposed.len(), 2);
        assert_eq!(report.disposed[0].type_tag, Upload::type_tag());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.scan_entities::<Upload>().unwrap().len(), 1);
        assert_eq!(store.scan_entities::<Session>().unwrap(), vec![session("s2", false)]);
    }

    // -----------------------------------------------------------------------
    // P6: disabled clean-up keeps disposable records
    // -----------------------------------------------------------------------
    #[test]
    fn disabled_clean_up_keeps_disposable_records() {
        let store = session_store();
        store.set_auto_clean_up(false);
        store.write(|txn| txn.put_entity(&session("s1", true)));
        store.write(|_| Ok::<_, StoreError>(()));

        assert_eq!(store.scan_entities::<Session>().unwrap().len(), 1);
        assert!(store.last_sweep().is_none());
    }

    // -----------------------------------------------------------------------
    // Configuration-driven store
    // -----------------------------------------------------------------------
    #[test]
    fn config_rules_sweep_raw_imports() {
        let config = StoreConfig::load_from_str(
            r#"
            [[types]]
            name = "Lease"
            key_field = "lease"

            [[disposal]]
            type_name = "Lease"
            field = "holder"
            when = "missing"
            "#,
        )
        .unwrap();
        let store = Store::open(config).unwrap();
        let tag = TypeTag::new("Lease").unwrap();
        let key_field = store.key_field(&tag).unwrap().to_string();

        store
            .import_with(
                &tag,
                &serde_json::json!([
                    { "lease": "l1", "holder": "ana" },
                    { "lease": "l2" },
                    { "lease": "l3", "holder": null }
                ]),
                |fields| Ok(keel_types::Record::from_fields(tag.clone(), &key_field, fields)?),
            )
            .unwrap();

        assert_eq!(store.read(|view| view.count(&tag)).unwrap(), 1);
        assert_eq!(store.stats().disposed, 2);
    }
}
