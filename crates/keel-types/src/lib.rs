//! Foundation types for Keel.
//!
//! This crate provides the record model shared by every other Keel crate.
//! A record is identified by its `(type, primary key)` pair and carries an
//! untyped field map; the [`Entity`] trait layers typed access on top.
//!
//! # Key Types
//!
//! - [`Record`] -- a typed, keyed unit of stored data
//! - [`RecordKey`] -- integer or string primary key
//! - [`TypeTag`] -- record type name, the first half of a record's identity
//! - [`Entity`] -- typed view of a record type, converted through serde
//! - [`ConstructError`] -- failure of a caller-supplied record constructor

pub mod entity;
pub mod error;
pub mod key;
pub mod record;

pub use entity::Entity;
pub use error::{json_kind, ConstructError, TypeError};
pub use key::{RecordKey, TypeTag};
pub use record::{FieldMap, Record, RecordId};

/// Field values are plain JSON values.
pub use serde_json::Value;
