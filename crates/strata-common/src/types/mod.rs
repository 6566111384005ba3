//! Core types shared across Strata components.

mod ids;

pub use ids::{ColumnId, RowId, RowVersion, SnapshotId, TableId, TransactionId};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A table id paired with an optional snapshot version.
///
/// A table without an explicit version (the "live" table) and each of its
/// snapshot versions are tracked independently by the status machinery, so
/// this pair is the key for status rows, locks, and index bindings.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableIdAndVersion {
    /// The table.
    pub table_id: TableId,
    /// The snapshot version, or `None` for the live table.
    pub version: Option<RowVersion>,
}

impl TableIdAndVersion {
    /// Creates a key for the live (unversioned) table.
    #[must_use]
    pub const fn live(table_id: TableId) -> Self {
        Self {
            table_id,
            version: None,
        }
    }

    /// Creates a key for a specific snapshot version of a table.
    #[must_use]
    pub const fn at_version(table_id: TableId, version: RowVersion) -> Self {
        Self {
            table_id,
            version: Some(version),
        }
    }
}

impl fmt::Debug for TableIdAndVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableIdAndVersion({self})")
    }
}

impl fmt::Display for TableIdAndVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}.{}", self.table_id, v),
            None => write!(f, "{}", self.table_id),
        }
    }
}

impl From<TableId> for TableIdAndVersion {
    fn from(table_id: TableId) -> Self {
        Self::live(table_id)
    }
}

/// The externally visible availability state of a table's index.
///
/// Any new truth mutation, or detected staleness, moves a table back to
/// `Processing` regardless of its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableState {
    /// The index is being (re)built; queries are rejected.
    Processing,
    /// The index matches the truth and may be queried.
    Available,
    /// The last build failed; the failure message is recorded in status.
    ProcessingFailed,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableState::Processing => write!(f, "PROCESSING"),
            TableState::Available => write!(f, "AVAILABLE"),
            TableState::ProcessingFailed => write!(f, "PROCESSING_FAILED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_and_versioned_keys_differ() {
        let table = TableId::new(7);
        let live = TableIdAndVersion::live(table);
        let versioned = TableIdAndVersion::at_version(table, RowVersion::new(3));
        assert_ne!(live, versioned);
        assert_eq!(live.table_id, versioned.table_id);
    }

    #[test]
    fn test_display() {
        let table = TableId::new(7);
        assert_eq!(TableIdAndVersion::live(table).to_string(), "7");
        assert_eq!(
            TableIdAndVersion::at_version(table, RowVersion::new(3)).to_string(),
            "7.3"
        );
    }
}
