//! The relational shard boundary.
//!
//! One `ShardConnection` holds the physical tables for a shard. The
//! connection is not assumed safe for concurrent statements: every
//! operation runs under the connection's statement lock, so within one
//! table's lease scope statements execute sequentially even when issued by
//! logically concurrent sub-tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, MutexGuard, RwLock};

use strata_common::types::{ColumnId, RowId, RowVersion, TableIdAndVersion};
use strata_schema::ColumnModel;

/// Suffix of the per-table metadata table ("status") name.
pub const STATUS_SUFFIX: &str = "_status";

/// Suffix of the temporary-copy table name.
pub const TEMP_SUFFIX: &str = "_temp";

/// Maps a logical table id to its deterministic physical table name.
///
/// Secondary "status" and "temp" tables share the same derivation with
/// fixed suffixes.
#[must_use]
pub fn physical_table_name(table: TableIdAndVersion) -> String {
    match table.version {
        Some(version) => format!("t{}_{}", table.table_id, version),
        None => format!("t{}", table.table_id),
    }
}

/// One physical row in an index table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRow {
    /// The version the row was last written at.
    pub version: RowVersion,
    /// The row's etag, when the change set carried one.
    pub etag: Option<String>,
    /// Cell values by column.
    pub cells: BTreeMap<ColumnId, Option<String>>,
}

/// One secondary index over a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIndex {
    /// Index name, derived from the column id.
    pub name: String,
    /// The indexed column.
    pub column_id: ColumnId,
}

/// The physical state of one index table.
#[derive(Debug, Clone, Default)]
pub struct PhysicalTable {
    /// Current physical columns, in order.
    pub columns: Vec<ColumnModel>,
    /// Rows by id.
    pub rows: BTreeMap<RowId, IndexRow>,
    /// Highest change-set version applied.
    pub max_applied_version: Option<RowVersion>,
    /// Hash of the ordered column-id list the index was built with.
    pub schema_hash: String,
    /// File references registered from applied cell values.
    pub file_refs: BTreeSet<u64>,
    /// Secondary indices currently assigned.
    pub secondary_indices: Vec<SecondaryIndex>,
}

/// A connection to one relational shard.
pub struct ShardConnection {
    statement_lock: Mutex<()>,
    tables: RwLock<HashMap<String, PhysicalTable>>,
}

impl ShardConnection {
    /// Opens an empty in-process shard.
    #[must_use]
    pub fn new() -> Self {
        Self {
            statement_lock: Mutex::new(()),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Acquires the statement lock; statements issued while the guard is
    /// alive are serialized against every other statement on this
    /// connection.
    pub fn statement_guard(&self) -> MutexGuard<'_, ()> {
        self.statement_lock.lock()
    }

    /// Runs a read statement against a physical table.
    pub fn read<T>(&self, name: &str, f: impl FnOnce(Option<&PhysicalTable>) -> T) -> T {
        let _stmt = self.statement_guard();
        let tables = self.tables.read();
        f(tables.get(name))
    }

    /// Runs a write statement against a physical table, creating it if
    /// missing.
    pub fn write<T>(&self, name: &str, f: impl FnOnce(&mut PhysicalTable) -> T) -> T {
        let _stmt = self.statement_guard();
        let mut tables = self.tables.write();
        f(tables.entry(name.to_string()).or_default())
    }

    /// Runs a write statement across two physical tables (used to copy
    /// into a temporary table).
    pub fn copy_table(&self, from: &str, to: &str) {
        let _stmt = self.statement_guard();
        let mut tables = self.tables.write();
        let copy = tables.get(from).cloned().unwrap_or_default();
        tables.insert(to.to_string(), copy);
    }

    /// Drops a physical table entirely.
    pub fn drop_table(&self, name: &str) {
        let _stmt = self.statement_guard();
        self.tables.write().remove(name);
    }

    /// True when the physical table exists.
    #[must_use]
    pub fn table_exists(&self, name: &str) -> bool {
        let _stmt = self.statement_guard();
        self.tables.read().contains_key(name)
    }
}

impl Default for ShardConnection {
    fn default() -> Self {
        Self::new()
    }
}
