use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use keel_dispose::{DisposalRegistry, DisposeError, FieldRule, Hook, SweepReport};
use keel_table::{InMemoryTable, ObjectTable, RecordScan};
use keel_txn::{BodyErrorPolicy, Durability, TransactionManager, TxnId, TxnStats, Volatile, WriteOutcome};
use keel_types::{Entity, Record, RecordKey, TypeTag};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

type Manager = TransactionManager<InMemoryTable>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The shared entry point: one object table, its transaction manager and the
/// disposal registry.
///
/// Construct once at startup and pass by reference (`Arc<Store>` across
/// threads). All table access, reads included, goes through the manager's
/// writer gate.
pub struct Store {
    manager: Manager,
    registry: RwLock<DisposalRegistry>,
    auto_clean_up: AtomicBool,
    key_fields: HashMap<TypeTag, String>,
    last_sweep: Mutex<Option<SweepReport>>,
    sweeps: AtomicU64,
    disposed: AtomicU64,
}

/// Counters for a running store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub txn: TxnStats,
    pub sweeps: u64,
    pub disposed: u64,
    pub registered_types: usize,
    pub records: usize,
}

impl Store {
    /// An empty in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::from_parts(
            Manager::new(InMemoryTable::new()),
            DisposalRegistry::new(),
            true,
            HashMap::new(),
        )
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Build a store from configuration.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::builder().config(config).build()
    }

    /// Like [`Self::open`], but logs the failure and exits the process.
    pub fn open_or_exit(config: StoreConfig) -> Self {
        match Self::open(config) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "store initialization failed");
                std::process::exit(1);
            }
        }
    }

    fn from_parts(
        manager: Manager,
        registry: DisposalRegistry,
        auto_clean_up: bool,
        key_fields: HashMap<TypeTag, String>,
    ) -> Self {
        Self {
            manager,
            registry: RwLock::new(registry),
            auto_clean_up: AtomicBool::new(auto_clean_up),
            key_fields,
            last_sweep: Mutex::new(None),
            sweeps: AtomicU64::new(0),
            disposed: AtomicU64::new(0),
        }
    }

    // -- write / read -------------------------------------------------------

    /// Run `body` in a transaction and commit it.
    ///
    /// With auto clean-up on, the disposal sweep runs in the same
    /// transaction after `body` succeeds and before commit. A `write` nested
    /// in another `write` runs inline: it neither sweeps nor commits. Body
    /// and commit failures are logged and reported in the outcome.
    pub fn write<R, E, F>(&self, body: F) -> WriteOutcome<R>
    where
        F: FnOnce(&WriteTxn<'_>) -> Result<R, E>,
        E: fmt::Display,
    {
        self.manager
            .run_write_with(|_| body(&WriteTxn { store: self }), |_| self.clean_up_before_commit())
    }

    /// Run `f` against a read-only view of the table.
    pub fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&ReadView<'_>) -> R,
    {
        let _session = self.manager.session();
        f(&ReadView {
            table: &self.manager,
        })
    }

    pub fn get_entity<E: Entity>(&self, key: impl Into<RecordKey>) -> StoreResult<Option<E>> {
        let key = key.into();
        self.read(|view| view.get_entity::<E>(key))
    }

    pub fn scan_entities<E: Entity>(&self) -> StoreResult<Vec<E>> {
        self.read(|view| view.scan_entities::<E>())
    }

    // -- clean-up -----------------------------------------------------------

    pub fn set_auto_clean_up(&self, enabled: bool) {
        self.auto_clean_up.store(enabled, Ordering::SeqCst);
        debug!(enabled, "auto clean-up toggled");
    }

    pub fn auto_clean_up(&self) -> bool {
        self.auto_clean_up.load(Ordering::SeqCst)
    }

    /// Sweep now, in a transaction of its own unless one is already open on
    /// this thread. Runs regardless of the auto clean-up flag.
    pub fn sweep_now(&self) -> StoreResult<SweepReport> {
        let session = self.manager.session();
        let nested = session.is_open();
        session.begin();

        let result = self.sweep_in_txn();
        if !nested {
            match &result {
                Ok(_) => {
                    if let Err(e) = session.commit() {
                        debug!(error = %e, "sweep commit failed; disposals stay applied");
                    }
                }
                Err(_) => {
                    if let Err(e) = session.cancel() {
                        warn!(error = %e, "cancel after failed sweep failed");
                    }
                }
            }
        }

        if let Ok(report) = &result {
            info!(
                disposed = report.disposed.len(),
                failures = report.failures.len(),
                "explicit sweep finished"
            );
        }
        result
    }

    /// Report of the most recent sweep, automatic or explicit.
    pub fn last_sweep(&self) -> Option<SweepReport> {
        self.last_sweep.lock().clone()
    }

    /// Sweep hook for the outermost commit of a write or import.
    pub(crate) fn clean_up_before_commit(&self) {
        if !self.auto_clean_up() {
            return;
        }
        if let Err(e) = self.sweep_in_txn() {
            warn!(error = %e, "automatic sweep failed");
        }
    }

    fn sweep_in_txn(&self) -> StoreResult<SweepReport> {
        let registry = self.registry.read();
        let report = registry.sweep(&self.manager)?;
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.disposed
            .fetch_add(report.disposed.len() as u64, Ordering::Relaxed);
        *self.last_sweep.lock() = Some(report.clone());
        Ok(report)
    }

    // -- registration -------------------------------------------------------
    //
    // Hooks run while the registry is read-locked and must not register.
    // Read-only accessors take the lock recursively so hooks may call them
    // while a registration is queued.

    pub fn register_disposable<E, P>(&self, predicate: P) -> StoreResult<()>
    where
        E: Entity + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Ok(self.registry.write().register::<E, P>(predicate)?)
    }

    pub fn register_disposable_with_hook<E, P, H>(&self, predicate: P, hook: H) -> StoreResult<()>
    where
        E: Entity + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(&dyn ObjectTable, &E) -> Result<(), DisposeError> + Send + Sync + 'static,
    {
        Ok(self
            .registry
            .write()
            .register_with_hook::<E, P, H>(predicate, hook)?)
    }

    pub fn register_disposable_raw<P>(
        &self,
        type_tag: TypeTag,
        predicate: P,
        hook: Option<Hook>,
    ) -> StoreResult<()>
    where
        P: Fn(&Record) -> Result<bool, DisposeError> + Send + Sync + 'static,
    {
        Ok(self.registry.write().register_raw(type_tag, predicate, hook)?)
    }

    pub fn register_rule(&self, rule: FieldRule) -> StoreResult<()> {
        Ok(self.registry.write().register_rule(rule)?)
    }

    /// Registered types with their predicate descriptions, in sweep order.
    pub fn disposable_types(&self) -> Vec<(TypeTag, String)> {
        self.registry
            .read_recursive()
            .registrations()
            .map(|r| (r.type_tag().clone(), r.description().to_string()))
            .collect()
    }

    // -- introspection ------------------------------------------------------

    /// Configured primary-key field for a raw type.
    pub fn key_field(&self, type_tag: &TypeTag) -> Option<&str> {
        self.key_fields.get(type_tag).map(String::as_str)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            txn: self.manager.stats(),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
            registered_types: self.registry.read_recursive().len(),
            records: self.manager.backend().len(),
        }
    }

    pub fn body_error_policy(&self) -> BodyErrorPolicy {
        self.manager.body_error_policy()
    }

    pub(crate) fn manager(&self) -> &Manager {
        &self.manager
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("manager", &self.manager)
            .field("auto_clean_up", &self.auto_clean_up())
            .field("registered_types", &self.registry.read_recursive().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StoreBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Store`].
///
/// Registrations happen in call order; configuration rules register when
/// [`Self::config`] is called. The first registration error is reported by
/// [`Self::build`].
pub struct StoreBuilder {
    registry: DisposalRegistry,
    durability: Box<dyn Durability>,
    policy: BodyErrorPolicy,
    auto_clean_up: bool,
    key_fields: HashMap<TypeTag, String>,
    failure: Option<StoreError>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            registry: DisposalRegistry::new(),
            durability: Box::new(Volatile),
            policy: BodyErrorPolicy::default(),
            auto_clean_up: true,
            key_fields: HashMap::new(),
            failure: None,
        }
    }

    /// Apply a configuration: flags, key fields and disposal rules.
    pub fn config(mut self, config: StoreConfig) -> Self {
        if let Err(e) = config.validate() {
            self.fail(e);
            return self;
        }
        self.auto_clean_up = config.auto_clean_up;
        self.policy = config.on_body_error;
        for ty in config.types {
            match TypeTag::new(ty.name) {
                Ok(tag) => {
                    self.key_fields.insert(tag, ty.key_field);
                }
                Err(e) => self.fail(e.into()),
            }
        }
        for rule in config.disposal {
            let result = self.registry.register_rule(rule);
            self.record(result);
        }
        self
    }

    pub fn auto_clean_up(mut self, enabled: bool) -> Self {
        self.auto_clean_up = enabled;
        self
    }

    pub fn body_error_policy(mut self, policy: BodyErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn durability(mut self, durability: Box<dyn Durability>) -> Self {
        self.durability = durability;
        self
    }

    pub fn key_field(mut self, type_tag: TypeTag, field: impl Into<String>) -> Self {
        self.key_fields.insert(type_tag, field.into());
        self
    }

    pub fn register<E, P>(mut self, predicate: P) -> Self
    where
        E: Entity + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let result = self.registry.register::<E, P>(predicate);
        self.record(result);
        self
    }

    pub fn register_with_hook<E, P, H>(mut self, predicate: P, hook: H) -> Self
    where
        E: Entity + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(&dyn ObjectTable, &E) -> Result<(), DisposeError> + Send + Sync + 'static,
    {
        let result = self.registry.register_with_hook::<E, P, H>(predicate, hook);
        self.record(result);
        self
    }

    pub fn register_rule(mut self, rule: FieldRule) -> Self {
        let result = self.registry.register_rule(rule);
        self.record(result);
        self
    }

    pub fn build(self) -> StoreResult<Store> {
        if let Some(e) = self.failure {
            return Err(StoreError::Initialization(e.to_string()));
        }

        let manager = Manager::with_durability(InMemoryTable::new(), self.durability)
            .with_body_error_policy(self.policy);
        info!(
            registered_types = self.registry.len(),
            auto_clean_up = self.auto_clean_up,
            policy = ?self.policy,
            "store opened"
        );
        Ok(Store::from_parts(
            manager,
            self.registry,
            self.auto_clean_up,
            self.key_fields,
        ))
    }

    fn record(&mut self, result: Result<(), DisposeError>) {
        if let Err(e) = result {
            self.fail(e.into());
        }
    }

    fn fail(&mut self, e: StoreError) {
        if self.failure.is_none() {
            self.failure = Some(e);
        }
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// WriteTxn / ReadView
// ---------------------------------------------------------------------------

/// Mutation handle passed to [`Store::write`] bodies.
pub struct WriteTxn<'a> {
    store: &'a Store,
}

impl<'a> WriteTxn<'a> {
    /// Insert or replace a record; returns the previous value.
    pub fn put(&self, record: Record) -> StoreResult<Option<Record>> {
        Ok(self.store.manager.put(record)?)
    }

    pub fn put_entity<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        self.put(entity.to_record()?)?;
        Ok(())
    }

    /// Remove a record; returns it if it existed.
    pub fn delete(&self, type_tag: &TypeTag, key: &RecordKey) -> StoreResult<Option<Record>> {
        Ok(self.store.manager.delete(type_tag, key)?)
    }

    /// Remove an entity by key; returns the removed entity.
    pub fn delete_entity<E: Entity>(&self, key: impl Into<RecordKey>) -> StoreResult<Option<E>> {
        self.delete(&E::type_tag(), &key.into())?
            .map(|record| record.decode::<E>())
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn get(&self, type_tag: &TypeTag, key: &RecordKey) -> StoreResult<Option<Record>> {
        Ok(self.store.manager.get(type_tag, key)?)
    }

    pub fn get_entity<E: Entity>(&self, key: impl Into<RecordKey>) -> StoreResult<Option<E>> {
        decode_opt(self.get(&E::type_tag(), &key.into())?)
    }

    pub fn scan(&self, type_tag: &TypeTag) -> StoreResult<RecordScan> {
        Ok(self.store.manager.scan(type_tag)?)
    }

    pub fn scan_entities<E: Entity>(&self) -> StoreResult<Vec<E>> {
        decode_all(self.scan(&E::type_tag())?)
    }

    /// Id of the enclosing transaction.
    pub fn id(&self) -> Option<TxnId> {
        self.store.manager.current_txn()
    }

    /// The store, for nested writes.
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// The transactional table, for code written against [`ObjectTable`].
    pub fn table(&self) -> &'a dyn ObjectTable {
        &self.store.manager
    }
}

/// Read-only handle passed to [`Store::read`] closures.
pub struct ReadView<'a> {
    table: &'a Manager,
}

impl ReadView<'_> {
    pub fn get(&self, type_tag: &TypeTag, key: &RecordKey) -> StoreResult<Option<Record>> {
        Ok(self.table.get(type_tag, key)?)
    }

    pub fn get_entity<E: Entity>(&self, key: impl Into<RecordKey>) -> StoreResult<Option<E>> {
        decode_opt(self.get(&E::type_tag(), &key.into())?)
    }

    pub fn scan(&self, type_tag: &TypeTag) -> StoreResult<RecordScan> {
        Ok(self.table.scan(type_tag)?)
    }

    pub fn scan_entities<E: Entity>(&self) -> StoreResult<Vec<E>> {
        decode_all(self.scan(&E::type_tag())?)
    }

    pub fn count(&self, type_tag: &TypeTag) -> StoreResult<usize> {
        Ok(self.table.count(type_tag)?)
    }

    pub fn type_tags(&self) -> StoreResult<Vec<TypeTag>> {
        Ok(self.table.type_tags()?)
    }
}

fn decode_opt<E: Entity>(record: Option<Record>) -> StoreResult<Option<E>> {
    Ok(record.map(|r| r.decode::<E>()).transpose()?)
}

fn decode_all<E: Entity>(scan: RecordScan) -> StoreResult<Vec<E>> {
    scan.map(|r| r.decode::<E>().map_err(StoreError::from))
        .collect()
}
