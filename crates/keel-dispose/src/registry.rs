use std::fmt;
use std::time::Instant;

use keel_table::ObjectTable;
use keel_types::{Entity, Record, TypeTag};
use tracing::{debug, warn};

use crate::error::{DisposeError, DisposeResult};
use crate::report::{SweepFailure, SweepReport, SweepStage};
use crate::rules::FieldRule;

/// Decides whether a record may be removed.
pub type Predicate = Box<dyn Fn(&Record) -> DisposeResult<bool> + Send + Sync>;

/// Runs just before a disposable record is deleted. May mutate the table.
pub type Hook = Box<dyn Fn(&dyn ObjectTable, &Record) -> DisposeResult<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// A record type that takes part in sweeps.
pub struct Registration {
    type_tag: TypeTag,
    description: String,
    predicate: Predicate,
    hook: Option<Hook>,
}

impl Registration {
    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    /// Human-readable summary of the predicate, for listings.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("type_tag", &self.type_tag)
            .field("description", &self.description)
            .field("has_hook", &self.has_hook())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DisposalRegistry
// ---------------------------------------------------------------------------

/// Ordered set of disposable record types.
///
/// Registrations are append-only and are swept in registration order.
#[derive(Debug, Default)]
pub struct DisposalRegistry {
    registrations: Vec<Registration>,
}

impl DisposalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register entity type `E`, disposable when `predicate` holds.
    pub fn register<E, P>(&mut self, predicate: P) -> DisposeResult<()>
    where
        E: Entity + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.push(
            E::type_tag(),
            format!("typed predicate on {}", E::TYPE),
            typed_predicate(predicate),
            None,
        )
    }

    /// Register entity type `E` with a hook run before each deletion.
    pub fn register_with_hook<E, P, H>(&mut self, predicate: P, hook: H) -> DisposeResult<()>
    where
        E: Entity + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(&dyn ObjectTable, &E) -> DisposeResult<()> + Send + Sync + 'static,
    {
        let hook: Hook = Box::new(
            move |table: &dyn ObjectTable, record: &Record| -> DisposeResult<()> {
                let entity = E::from_record(record)?;
                hook(table, &entity)
            },
        );
        self.push(
            E::type_tag(),
            format!("typed predicate on {} with hook", E::TYPE),
            typed_predicate(predicate),
            Some(hook),
        )
    }

    /// Register a type by tag over raw records.
    pub fn register_raw<P>(
        &mut self,
        type_tag: TypeTag,
        predicate: P,
        hook: Option<Hook>,
    ) -> DisposeResult<()>
    where
        P: Fn(&Record) -> DisposeResult<bool> + Send + Sync + 'static,
    {
        let description = format!("raw predicate on {type_tag}");
        self.push(type_tag, description, Box::new(predicate), hook)
    }

    /// Register a declarative field rule.
    pub fn register_rule(&mut self, rule: FieldRule) -> DisposeResult<()> {
        let type_tag = rule.validate()?;
        let description = rule.to_string();
        self.push(
            type_tag,
            description,
            Box::new(move |record: &Record| rule.matches(record)),
            None,
        )
    }

    fn push(
        &mut self,
        type_tag: TypeTag,
        description: String,
        predicate: Predicate,
        hook: Option<Hook>,
    ) -> DisposeResult<()> {
        if self.is_registered(&type_tag) {
            return Err(DisposeError::AlreadyRegistered(type_tag));
        }
        debug!(type_tag = %type_tag, %description, "registered disposable type");
        self.registrations.push(Registration {
            type_tag,
            description,
            predicate,
            hook,
        });
        Ok(())
    }

    pub fn is_registered(&self, type_tag: &TypeTag) -> bool {
        self.registrations.iter().any(|r| &r.type_tag == type_tag)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Registrations in sweep order.
    pub fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    /// Remove every disposable record, type by type in registration order.
    ///
    /// `table` must accept mutations (an open transaction). Each candidate is
    /// re-read before its predicate runs, so records removed by an earlier
    /// hook are skipped. A failing predicate, hook or delete keeps the record,
    /// is logged and lands in the report; the sweep carries on.
    pub fn sweep(&self, table: &dyn ObjectTable) -> DisposeResult<SweepReport> {
        if !table.is_writable() {
            return Err(DisposeError::NoOpenTransaction);
        }

        let started = Instant::now();
        let mut report = SweepReport::default();

        for registration in &self.registrations {
            let type_tag = &registration.type_tag;
            report.visited.push(type_tag.clone());

            let scan = match table.scan(type_tag) {
                Ok(scan) => scan,
                Err(e) => {
                    warn!(type_tag = %type_tag, error = %e, "sweep could not scan type");
                    report.failures.push(SweepFailure {
                        type_tag: type_tag.clone(),
                        record: None,
                        stage: SweepStage::Scan,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let scanned = scan.len();
            let before = report.disposed.len();
            for snapshot in scan {
                if let Err((stage, e)) = Self::dispose_one(registration, table, &snapshot, &mut report) {
                    warn!(record = %snapshot.id(), %stage, error = %e, "sweep skipped record");
                    report.failures.push(SweepFailure {
                        type_tag: type_tag.clone(),
                        record: Some(snapshot.id()),
                        stage,
                        message: e.to_string(),
                    });
                }
            }

            debug!(
                type_tag = %type_tag,
                scanned,
                disposed = report.disposed.len() - before,
                "swept type"
            );
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    fn dispose_one(
        registration: &Registration,
        table: &dyn ObjectTable,
        snapshot: &Record,
        report: &mut SweepReport,
    ) -> Result<(), (SweepStage, DisposeError)> {
        let current = match table.get(&snapshot.type_tag, &snapshot.key) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(e) => return Err((SweepStage::Read, e.into())),
        };

        let disposable = (registration.predicate)(&current).map_err(|e| (SweepStage::Predicate, e))?;
        if !disposable {
            return Ok(());
        }

        if let Some(hook) = &registration.hook {
            hook(table, &current).map_err(|e| (SweepStage::Hook, e))?;
        }

        table
            .delete(&current.type_tag, &current.key)
            .map_err(|e| (SweepStage::Delete, e.into()))?;
        report.disposed.push(current.id());
        Ok(())
    }
}

fn typed_predicate<E, P>(predicate: P) -> Predicate
where
    E: Entity + 'static,
    P: Fn(&E) -> bool + Send + Sync + 'static,
{
    Box::new(move |record: &Record| -> DisposeResult<bool> {
        Ok(predicate(&E::from_record(record)?))
    })
}
