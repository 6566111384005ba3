//! The append-only row truth store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use strata_cache::RowVersionCache;
use strata_common::types::{ColumnId, RowId, RowVersion, TableId};
use strata_common::{StrataError, StrataResult};
use strata_schema::ColumnModel;

use crate::blob::{BlobRef, BlobStore};
use crate::codec;
use crate::model::{
    assign_ids_and_versions, convert_to_schema_and_merge, ChangeType, ColumnChange, IdRange, Row,
    RowReference, RowReferenceSet, RowSet, TableRowChange,
};

/// Latest-row read result: per-row version plus cell access by column.
#[derive(Debug, Default)]
pub struct RowSetAccessor {
    rows: HashMap<RowId, AccessorRow>,
}

#[derive(Debug)]
struct AccessorRow {
    version: RowVersion,
    cells: BTreeMap<ColumnId, Option<String>>,
}

impl RowSetAccessor {
    /// The latest version of a row, if it exists (and is not deleted).
    #[must_use]
    pub fn version(&self, row_id: RowId) -> Option<RowVersion> {
        self.rows.get(&row_id).map(|r| r.version)
    }

    /// The latest value of one cell; outer `None` when the row is absent,
    /// inner `None` when the cell is null.
    #[must_use]
    pub fn cell(&self, row_id: RowId, column_id: ColumnId) -> Option<Option<String>> {
        self.rows
            .get(&row_id)
            .map(|r| r.cells.get(&column_id).cloned().unwrap_or(None))
    }

    /// Row ids present in the accessor.
    #[must_use]
    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.keys().copied().collect()
    }
}

/// Per-table sequence state and ledger.
#[derive(Debug, Default)]
struct TableTruth {
    /// Highest row id ever allocated.
    last_allocated: Option<RowId>,
    /// Version assigned by the most recent reservation.
    current_version: Option<RowVersion>,
    /// Etag issued by the most recent reservation.
    etag: Option<String>,
    /// Ledger records in version order.
    changes: Vec<TableRowChange>,
}

/// The authoritative, append-only ledger of row-level changes per table.
///
/// All state-changing operations for one table are serialized by that
/// table's entry lock; callers additionally hold the table's exclusive
/// lease (see `strata-coord`) so that reservation, conflict checks, and
/// blob persistence observe one consistent snapshot.
pub struct TruthStore {
    blob_store: Arc<dyn BlobStore>,
    version_cache: Arc<RowVersionCache>,
    tables: DashMap<TableId, Arc<Mutex<TableTruth>>>,
}

impl TruthStore {
    /// Creates a truth store over the given blob store and row-version
    /// cache capability.
    #[must_use]
    pub fn new(blob_store: Arc<dyn BlobStore>, version_cache: Arc<RowVersionCache>) -> Self {
        Self {
            blob_store,
            version_cache,
            tables: DashMap::new(),
        }
    }

    fn table_entry(&self, table_id: TableId) -> Arc<Mutex<TableTruth>> {
        self.tables
            .entry(table_id)
            .or_insert_with(|| Arc::new(Mutex::new(TableTruth::default())))
            .clone()
    }

    /// Atomically allocates `count` fresh row ids (possibly zero) and the
    /// next version number for the table.
    pub fn reserve_ids_in_range(&self, table_id: TableId, count: u64) -> IdRange {
        let entry = self.table_entry(table_id);
        let mut truth = entry.lock();
        Self::reserve_locked(&mut truth, count)
    }

    fn reserve_locked(truth: &mut TableTruth, count: u64) -> IdRange {
        let maximum_update_id = truth.last_allocated;
        let (minimum_id, maximum_id) = if count > 0 {
            let minimum = truth
                .last_allocated
                .map(RowId::next)
                .unwrap_or(RowId::FIRST);
            let maximum = RowId::new(minimum.as_u64() + count - 1);
            truth.last_allocated = Some(maximum);
            (Some(minimum), Some(maximum))
        } else {
            (None, None)
        };
        let version = truth
            .current_version
            .map(RowVersion::next)
            .unwrap_or(RowVersion::FIRST);
        truth.current_version = Some(version);
        let etag = Uuid::new_v4().to_string();
        truth.etag = Some(etag.clone());
        IdRange {
            minimum_id,
            maximum_id,
            maximum_update_id,
            version,
            etag,
        }
    }

    /// Appends a validated change set to the table's truth.
    ///
    /// Reserves ids and the next version, runs the row-level conflict
    /// check when the caller supplied prior version/etag information,
    /// assigns ids, persists the blob plus the ledger record, and returns
    /// one `(row id, version)` reference per row. On any failure after the
    /// blob is written, the blob is deleted before the error propagates.
    pub fn append_row_set(
        &self,
        actor: &str,
        table_id: TableId,
        columns: &[ColumnModel],
        mut set: RowSet,
    ) -> StrataResult<RowReferenceSet> {
        set.validate()?;
        if set.table_id != table_id {
            return Err(StrataError::invalid_argument(format!(
                "row set targets table {} but was appended to table {table_id}",
                set.table_id
            )));
        }

        let entry = self.table_entry(table_id);
        let mut truth = entry.lock();
        let rollback = (
            truth.last_allocated,
            truth.current_version,
            truth.etag.clone(),
        );

        let result = self.append_locked(&mut truth, actor, table_id, columns, &mut set);
        match result {
            Ok(refs) => Ok(refs),
            Err(e) => {
                (truth.last_allocated, truth.current_version, truth.etag) = rollback;
                Err(e)
            }
        }
    }

    fn append_locked(
        &self,
        truth: &mut TableTruth,
        actor: &str,
        table_id: TableId,
        columns: &[ColumnModel],
        set: &mut RowSet,
    ) -> StrataResult<RowReferenceSet> {
        let count = set.count_rows_needing_ids() as u64;
        let range = Self::reserve_locked(truth, count);

        // Only run the optimistic check when the caller supplied prior
        // version or etag information; an unversioned append to existing
        // rows is a deliberate last-writer-wins write.
        let updates = set.existing_row_versions();
        let supplied_versions = updates.values().any(Option::is_some);
        if !updates.is_empty() && (supplied_versions || set.etag.is_some()) {
            Self::check_conflicts_locked(self.blob_store.as_ref(), truth, table_id, set)?;
        }

        assign_ids_and_versions(set, &range)?;

        let blob = codec::write_change_set(columns, set)?;
        let blob_ref = self.blob_store.put(&blob)?;

        let change = TableRowChange {
            table_id,
            row_version: range.version,
            change_type: ChangeType::Row,
            created_by: actor.to_string(),
            created_on: Utc::now(),
            header: set.header.clone(),
            bucket: blob_ref.bucket.clone(),
            key: blob_ref.key.clone(),
            etag: range.etag.clone(),
            row_count: set.rows.len(),
        };
        if let Err(e) = Self::record_change_locked(truth, change) {
            // Do not leave an orphaned blob referenced nowhere.
            if let Err(cleanup) = self.blob_store.delete(&blob_ref) {
                warn!(%table_id, key = %blob_ref.key, error = %cleanup, "failed to delete orphaned blob");
            }
            return Err(e);
        }

        let row_ids: Vec<RowId> = set.rows.iter().filter_map(|r| r.row_id).collect();
        self.version_cache
            .record_change_set(table_id, &row_ids, range.version);

        debug!(%table_id, version = %range.version, rows = set.rows.len(), "appended change set");
        Ok(RowReferenceSet {
            table_id,
            header: set.header.clone(),
            etag: range.etag,
            rows: set
                .rows
                .iter()
                .filter_map(|r| match (r.row_id, r.version) {
                    (Some(row_id), Some(version)) => Some(RowReference { row_id, version }),
                    _ => None,
                })
                .collect(),
        })
    }

    fn record_change_locked(truth: &mut TableTruth, change: TableRowChange) -> StrataResult<()> {
        if let Some(last) = truth.changes.last() {
            if change.row_version <= last.row_version {
                return Err(StrataError::internal(format!(
                    "ledger version {} is not after the last recorded version {}",
                    change.row_version, last.row_version
                )));
            }
        }
        truth.changes.push(change);
        Ok(())
    }

    /// Raises `Conflict` when any row of `set` that carries a version
    /// number has been changed since that version.
    ///
    /// An update row with no version number is rejected as ambiguous.
    pub fn check_for_row_level_conflict(
        &self,
        table_id: TableId,
        set: &RowSet,
    ) -> StrataResult<()> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        Self::check_conflicts_locked(self.blob_store.as_ref(), &truth, table_id, set)
    }

    fn check_conflicts_locked(
        blob_store: &dyn BlobStore,
        truth: &TableTruth,
        table_id: TableId,
        set: &RowSet,
    ) -> StrataResult<()> {
        let updates = set.existing_row_versions();
        if updates.is_empty() {
            return Ok(());
        }
        let mut read_version: Option<RowVersion> = None;
        for (row_id, version) in &updates {
            let version = version.ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "update row {row_id} carries no version number; \
                     the intended base version is ambiguous"
                ))
            })?;
            read_version = Some(read_version.map_or(version, |v| v.max(version)));
        }
        if let Some(etag) = &set.etag {
            let etag_version = Self::version_for_etag_locked(truth, table_id, etag)?;
            read_version = Some(read_version.map_or(etag_version, |v| v.max(etag_version)));
        }
        let Some(read_version) = read_version else {
            return Ok(());
        };

        let update_ids: BTreeSet<RowId> = updates.keys().copied().collect();
        for change in &truth.changes {
            if change.row_version <= read_version || change.change_type != ChangeType::Row {
                continue;
            }
            let blob = blob_store.get(&BlobRef {
                bucket: change.bucket.clone(),
                key: change.key.clone(),
            })?;
            let (_, rows) = codec::read_change_set(&blob)?;
            for row in rows {
                if let Some(row_id) = row.row_id {
                    if update_ids.contains(&row_id) {
                        return Err(StrataError::conflict(format!(
                            "row {row_id} has been changed since last read; \
                             get the latest value and retry the update"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the latest version for each requested row.
    ///
    /// Served from the row-version cache when it is enabled and caught up
    /// to the truth's current version; otherwise recomputed by scanning
    /// the change log from `min_version` upward.
    pub fn get_latest_versions(
        &self,
        table_id: TableId,
        row_ids: &[RowId],
        min_version: RowVersion,
    ) -> StrataResult<HashMap<RowId, RowVersion>> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        if let Some(current) = truth.last_row_change_version() {
            if let Some(cached) = self.version_cache.latest_versions(table_id, row_ids, current) {
                return Ok(cached);
            }
        }
        let accessor = Self::scan_rows_locked(
            self.blob_store.as_ref(),
            &truth,
            row_ids,
            min_version,
        )?;
        Ok(accessor
            .rows
            .iter()
            .map(|(id, row)| (*id, row.version))
            .collect())
    }

    /// Returns the latest version and cell values for each requested row,
    /// recomputed from the change log.
    pub fn get_latest_rows(
        &self,
        table_id: TableId,
        row_ids: &[RowId],
        min_version: RowVersion,
    ) -> StrataResult<RowSetAccessor> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        Self::scan_rows_locked(self.blob_store.as_ref(), &truth, row_ids, min_version)
    }

    fn scan_rows_locked(
        blob_store: &dyn BlobStore,
        truth: &TableTruth,
        row_ids: &[RowId],
        min_version: RowVersion,
    ) -> StrataResult<RowSetAccessor> {
        let wanted: BTreeSet<RowId> = row_ids.iter().copied().collect();
        let mut accessor = RowSetAccessor::default();
        for change in &truth.changes {
            if change.change_type != ChangeType::Row || change.row_version < min_version {
                continue;
            }
            let blob = blob_store.get(&BlobRef {
                bucket: change.bucket.clone(),
                key: change.key.clone(),
            })?;
            let (header, rows) = codec::read_change_set(&blob)?;
            for row in rows {
                let Some(row_id) = row.row_id else { continue };
                if !wanted.contains(&row_id) {
                    continue;
                }
                match row.values {
                    None => {
                        accessor.rows.remove(&row_id);
                    }
                    Some(values) => {
                        let slot = accessor.rows.entry(row_id).or_insert(AccessorRow {
                            version: change.row_version,
                            cells: BTreeMap::new(),
                        });
                        slot.version = change.row_version;
                        for (column_id, value) in header.iter().zip(values) {
                            slot.cells.insert(*column_id, value);
                        }
                    }
                }
            }
        }
        Ok(accessor)
    }

    /// Reads the exact historical rows named by a reference set,
    /// re-projected onto the requested columns.
    pub fn get_row_set_originals(
        &self,
        refs: &RowReferenceSet,
        columns: &[ColumnModel],
    ) -> StrataResult<RowSet> {
        let mut by_version: BTreeMap<RowVersion, BTreeSet<RowId>> = BTreeMap::new();
        for r in &refs.rows {
            by_version.entry(r.version).or_default().insert(r.row_id);
        }
        let mut sets = Vec::new();
        for (version, row_ids) in by_version {
            let mut set = self.read_change_set(refs.table_id, version)?;
            set.rows.retain(|row| {
                row.row_id.map(|id| row_ids.contains(&id)).unwrap_or(false)
            });
            sets.push(set);
        }
        Ok(convert_to_schema_and_merge(&sets, columns, refs.table_id))
    }

    /// Reads one stored change set, re-projected onto the requested
    /// columns. Columns missing from the stored header resolve to their
    /// defaults.
    pub fn get_row_set(
        &self,
        table_id: TableId,
        version: RowVersion,
        columns: &[ColumnModel],
    ) -> StrataResult<RowSet> {
        let set = self.read_change_set(table_id, version)?;
        Ok(convert_to_schema_and_merge(&[set], columns, table_id))
    }

    /// Reads one stored change set exactly as written: the stored header
    /// and every row, deletion markers included. This is the replay path
    /// the index manager consumes.
    pub fn get_change_set(&self, table_id: TableId, version: RowVersion) -> StrataResult<RowSet> {
        self.read_change_set(table_id, version)
    }

    fn read_change_set(&self, table_id: TableId, version: RowVersion) -> StrataResult<RowSet> {
        let change = self.get_change(table_id, version)?;
        if change.change_type != ChangeType::Row {
            return Err(StrataError::invalid_argument(format!(
                "change {version} of table {table_id} is a schema change, not row data"
            )));
        }
        let blob = self.blob_store.get(&BlobRef {
            bucket: change.bucket,
            key: change.key,
        })?;
        let (header, rows) = codec::read_change_set(&blob)?;
        Ok(RowSet {
            table_id,
            header,
            etag: Some(change.etag),
            rows,
        })
    }

    /// Records a schema change in the ledger as a `Column`-type entry.
    pub fn append_schema_change(
        &self,
        actor: &str,
        table_id: TableId,
        current_column_ids: &[ColumnId],
        changes: &[ColumnChange],
    ) -> StrataResult<RowVersion> {
        let entry = self.table_entry(table_id);
        let mut truth = entry.lock();
        let rollback = (
            truth.last_allocated,
            truth.current_version,
            truth.etag.clone(),
        );
        let range = Self::reserve_locked(&mut truth, 0);
        let blob = codec::write_schema_change(changes)?;
        let blob_ref = match self.blob_store.put(&blob) {
            Ok(blob_ref) => blob_ref,
            Err(e) => {
                (truth.last_allocated, truth.current_version, truth.etag) = rollback;
                return Err(e);
            }
        };
        let change = TableRowChange {
            table_id,
            row_version: range.version,
            change_type: ChangeType::Column,
            created_by: actor.to_string(),
            created_on: Utc::now(),
            header: current_column_ids.to_vec(),
            bucket: blob_ref.bucket.clone(),
            key: blob_ref.key.clone(),
            etag: range.etag,
            row_count: 0,
        };
        if let Err(e) = Self::record_change_locked(&mut truth, change) {
            (truth.last_allocated, truth.current_version, truth.etag) = rollback;
            if let Err(cleanup) = self.blob_store.delete(&blob_ref) {
                warn!(%table_id, key = %blob_ref.key, error = %cleanup, "failed to delete orphaned blob");
            }
            return Err(e);
        }
        Ok(range.version)
    }

    /// Reads back the schema change recorded at a version.
    pub fn get_schema_change(
        &self,
        table_id: TableId,
        version: RowVersion,
    ) -> StrataResult<Vec<ColumnChange>> {
        let change = self.get_change(table_id, version)?;
        if change.change_type != ChangeType::Column {
            return Err(StrataError::invalid_argument(format!(
                "change {version} of table {table_id} is row data, not a schema change"
            )));
        }
        let blob = self.blob_store.get(&BlobRef {
            bucket: change.bucket,
            key: change.key,
        })?;
        codec::read_schema_change(&blob)
    }

    // =========================================================================
    // Ledger queries
    // =========================================================================

    /// The most recent change of any type, or `None` for a fresh table.
    #[must_use]
    pub fn last_change(&self, table_id: TableId) -> Option<TableRowChange> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        truth.changes.last().cloned()
    }

    /// The most recent change of the given type.
    #[must_use]
    pub fn last_change_of_type(
        &self,
        table_id: TableId,
        change_type: ChangeType,
    ) -> Option<TableRowChange> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        truth
            .changes
            .iter()
            .rev()
            .find(|c| c.change_type == change_type)
            .cloned()
    }

    /// All changes for a table in version order.
    #[must_use]
    pub fn list_changes(&self, table_id: TableId) -> Vec<TableRowChange> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        truth.changes.clone()
    }

    /// All `Row`-type changes with a version strictly greater than
    /// `version`, in version order.
    #[must_use]
    pub fn list_changes_after(&self, table_id: TableId, version: RowVersion) -> Vec<TableRowChange> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        truth
            .changes
            .iter()
            .filter(|c| c.row_version > version && c.change_type == ChangeType::Row)
            .cloned()
            .collect()
    }

    /// The change recorded at exactly this version.
    pub fn get_change(&self, table_id: TableId, version: RowVersion) -> StrataResult<TableRowChange> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        truth
            .changes
            .iter()
            .find(|c| c.row_version == version)
            .cloned()
            .ok_or_else(|| {
                StrataError::not_found(format!("change {version} for table {table_id}"))
            })
    }

    /// Resolves a change etag to its version. Unknown etags are caller
    /// errors, not missing data.
    pub fn version_for_etag(&self, table_id: TableId, etag: &str) -> StrataResult<RowVersion> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        Self::version_for_etag_locked(&truth, table_id, etag)
    }

    fn version_for_etag_locked(
        truth: &TableTruth,
        table_id: TableId,
        etag: &str,
    ) -> StrataResult<RowVersion> {
        truth
            .changes
            .iter()
            .find(|c| c.etag == etag)
            .map(|c| c.row_version)
            .ok_or_else(|| {
                StrataError::invalid_argument(format!("invalid etag '{etag}' for table {table_id}"))
            })
    }

    /// The truth's current version (last reservation), or `None` for a
    /// fresh table.
    #[must_use]
    pub fn current_version(&self, table_id: TableId) -> Option<RowVersion> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        truth.current_version
    }

    /// The highest row id ever allocated for the table.
    #[must_use]
    pub fn max_row_id(&self, table_id: TableId) -> Option<RowId> {
        let entry = self.table_entry(table_id);
        let truth = entry.lock();
        truth.last_allocated
    }

    /// Deletes every blob and ledger record for a table, and resets its
    /// sequences.
    pub fn delete_all_row_data(&self, table_id: TableId) -> StrataResult<()> {
        let entry = self.table_entry(table_id);
        let mut truth = entry.lock();
        for change in &truth.changes {
            self.blob_store.delete(&BlobRef {
                bucket: change.bucket.clone(),
                key: change.key.clone(),
            })?;
        }
        *truth = TableTruth::default();
        self.version_cache.invalidate_table(table_id);
        Ok(())
    }
}

impl TableTruth {
    /// Version of the last `Row`-type change, used to judge whether the
    /// row-version cache is caught up.
    fn last_row_change_version(&self) -> Option<RowVersion> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.change_type == ChangeType::Row)
            .map(|c| c.row_version)
    }
}
