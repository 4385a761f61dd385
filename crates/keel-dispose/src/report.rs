use std::fmt;
use std::time::Duration;

use keel_types::{RecordId, TypeTag};
use serde::Serialize;

/// Step of the per-record sweep at which a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStage {
    Scan,
    Read,
    Predicate,
    Hook,
    Delete,
}

impl fmt::Display for SweepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Read => "read",
            Self::Predicate => "predicate",
            Self::Hook => "hook",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A record (or a whole type, for scan failures) the sweep had to skip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub type_tag: TypeTag,
    /// `None` when the type could not be scanned at all.
    pub record: Option<RecordId>,
    pub stage: SweepStage,
    pub message: String,
}

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Registered types, in the order they were visited.
    pub visited: Vec<TypeTag>,
    /// Records removed, in removal order.
    pub disposed: Vec<RecordId>,
    pub failures: Vec<SweepFailure>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl SweepReport {
    /// `true` if no record had to be skipped.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of records of `type_tag` that were removed.
    pub fn disposed_of(&self, type_tag: &TypeTag) -> usize {
        self.disposed
            .iter()
            .filter(|id| &id.type_tag == type_tag)
            .count()
    }
}
