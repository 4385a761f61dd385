//! Declarative disposal rules.
//!
//! A rule names a record type, a field, and a condition on that field. Rules
//! come from configuration and register like any other predicate.

pub mod field;

pub use field::{FieldRule, RuleCondition};
