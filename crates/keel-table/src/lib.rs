//! Primary-key object table for Keel.
//!
//! The object table maps `(type, primary key)` to a [`Record`]. It is the
//! leaf of the Keel stack: transactions, disposal and the store facade all
//! reach records through the [`ObjectTable`] trait defined here.
//!
//! # Backends
//!
//! - [`InMemoryTable`] -- `HashMap`-based table behind a `RwLock`
//!
//! # Design Rules
//!
//! 1. At most one record exists per `(type, key)`; the latest `put` wins.
//! 2. Lookups by primary key are O(1) amortized.
//! 3. Scans are snapshots: later writes never show up in a scan already taken.
//! 4. Scans yield records in ascending key order.
//! 5. The table never interprets record fields.
//!
//! [`Record`]: keel_types::Record

pub mod error;
pub mod memory;
pub mod scan;
pub mod traits;

pub use error::{TableError, TableResult};
pub use memory::InMemoryTable;
pub use scan::RecordScan;
pub use traits::ObjectTable;
