//! Disposal registry for Keel.
//!
//! Record types opt into cleanup by registering a disposability predicate
//! and, optionally, a pre-delete hook. A sweep walks the registered types in
//! registration order and removes every record whose predicate holds,
//! calling the hook first.
//!
//! # Key Types
//!
//! - [`DisposalRegistry`] -- append-only, ordered set of registrations
//! - [`Registration`] -- one type with its predicate and hook
//! - [`FieldRule`] -- declarative predicate over a single field
//! - [`SweepReport`] -- what a sweep visited, removed and skipped
//!
//! # Design Rules
//!
//! 1. A type is registered at most once.
//! 2. Sweeps only run against a table that accepts mutations.
//! 3. A record the hook cannot process stays in the table.
//! 4. One failing record never aborts the sweep.

pub mod error;
pub mod registry;
pub mod report;
pub mod rules;

pub use error::{DisposeError, DisposeResult};
pub use registry::{DisposalRegistry, Hook, Predicate, Registration};
pub use report::{SweepFailure, SweepReport, SweepStage};
pub use rules::{FieldRule, RuleCondition};
