//! The derived relational index for Strata tables.
//!
//! Each table owns one index: a rebuildable relational projection of its
//! truth. The index manager applies truth change sets incrementally and
//! idempotently (guarded by a max-applied-version marker), evolves the
//! physical schema with minimal change sets, validates prospective schema
//! changes against a temporary copy, bulk-populates views from an external
//! replication source, and maintains secondary indices ranked by column
//! cardinality.

mod manager;
mod replication;
mod schema;
mod shard;

pub use manager::{IndexSyncState, TableIndex};
pub use replication::{ReplicatedRow, ReplicationSource};
pub use schema::{diff_schema, ColumnChangeDetails};
pub use shard::{
    physical_table_name, IndexRow, PhysicalTable, SecondaryIndex, ShardConnection, STATUS_SUFFIX,
    TEMP_SUFFIX,
};
