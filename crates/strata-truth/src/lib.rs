//! The row truth store: Strata's append-only ledger of row changes.
//!
//! Every mutation to a table lands here first as a versioned change set -
//! a compressed blob of row values plus a ledger record. The derived index
//! (`strata-index`) replays these change sets in version order; deleting
//! the index loses nothing, because the truth can always rebuild it.
//!
//! This crate also owns the table transaction ledger, snapshots, view
//! scopes, and the view/source-table dependency map used for invalidation
//! fan-out.

pub mod blob;
pub mod codec;
pub mod ledger;
pub mod model;
pub mod store;

pub use blob::{BlobRef, BlobStore, FsBlobStore, MemoryBlobStore};
pub use ledger::{TableSnapshot, TableTransaction, TransactionLedger, ViewScope};
pub use model::{
    ChangeType, ColumnChange, IdRange, Row, RowReference, RowReferenceSet, RowSet, SparseChangeSet,
    SparseRow, TableRowChange,
};
pub use store::{RowSetAccessor, TruthStore};
