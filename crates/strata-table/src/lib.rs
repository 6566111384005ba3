//! The table manager for Strata.
//!
//! This crate ties the engine together: client mutations flow through the
//! truth store (reserve ids and a version, persist the change set, update
//! the ledger), the table's status drops to processing, the index worker
//! replays the change sets in version order, and the table returns to
//! available. Queries compile, take the read lease, check status, and run
//! against the index.

mod csv;
mod manager;

pub use csv::{CsvRowIterator, CsvWriterRowHandler};
pub use manager::{
    SchemaChangeRequest, TableManager, UpdateRequest, UpdateResponse,
};
