//! Write-through cache of each row's latest version.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use strata_common::types::{RowId, RowVersion, TableId};

/// Per-table state: the latest version seen for each row, plus the change
/// version the cache is caught up to.
#[derive(Debug, Default)]
struct TableVersions {
    rows: HashMap<RowId, RowVersion>,
    caught_up_to: Option<RowVersion>,
}

/// A write-through map of row-id → latest version per table.
///
/// The truth store records each applied change set here; readers may only
/// use the cached answer when the cache is both enabled and caught up to
/// the truth's current version, otherwise they recompute from the change
/// log. Falling behind (a missed change, an explicit invalidation) simply
/// drops the table's entry; the change log is always authoritative.
#[derive(Debug)]
pub struct RowVersionCache {
    enabled: bool,
    tables: DashMap<TableId, TableVersions>,
}

impl RowVersionCache {
    /// Creates the cache; `enabled = false` makes every read miss and
    /// every write a no-op.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            tables: DashMap::new(),
        }
    }

    /// Whether the capability is live.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records an applied change set: every row in `row_ids` now has
    /// `version` as its latest version.
    ///
    /// The write is only accepted when it extends the cached state by
    /// exactly one version (or primes an empty table); a gap means the
    /// cache missed a change, so the table's entry is dropped instead.
    pub fn record_change_set(&self, table_id: TableId, row_ids: &[RowId], version: RowVersion) {
        if !self.enabled {
            return;
        }
        let mut entry = self.tables.entry(table_id).or_default();
        let contiguous = match entry.caught_up_to {
            None => entry.rows.is_empty() && version == RowVersion::FIRST,
            Some(current) => version == current.next(),
        };
        if !contiguous {
            debug!(table = %table_id, %version, "row-version cache fell behind; dropping table");
            entry.rows.clear();
            entry.caught_up_to = None;
            return;
        }
        for row_id in row_ids {
            entry.rows.insert(*row_id, version);
        }
        entry.caught_up_to = Some(version);
    }

    /// Returns the latest versions for the requested rows, provided the
    /// cache is caught up to `truth_version`. Rows the cache has never
    /// seen are absent from the result (they have never been written).
    #[must_use]
    pub fn latest_versions(
        &self,
        table_id: TableId,
        row_ids: &[RowId],
        truth_version: RowVersion,
    ) -> Option<HashMap<RowId, RowVersion>> {
        if !self.enabled {
            return None;
        }
        let entry = self.tables.get(&table_id)?;
        if entry.caught_up_to != Some(truth_version) {
            return None;
        }
        let mut result = HashMap::new();
        for row_id in row_ids {
            if let Some(version) = entry.rows.get(row_id) {
                result.insert(*row_id, *version);
            }
        }
        Some(result)
    }

    /// Drops everything cached for a table.
    pub fn invalidate_table(&self, table_id: TableId) {
        self.tables.remove(&table_id);
    }

    /// The change version the cache is caught up to for a table.
    #[must_use]
    pub fn caught_up_to(&self, table_id: TableId) -> Option<RowVersion> {
        self.tables.get(&table_id).and_then(|e| e.caught_up_to)
    }
}
