//! The table manager: the single entry point tying truth, index, status,
//! locking, and query execution together.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use strata_common::config::HeartbeatConfig;
use strata_common::types::{
    ColumnId, RowId, RowVersion, TableId, TableIdAndVersion, TransactionId,
};
use strata_common::{StrataError, StrataResult};
use strata_coord::{Heartbeat, TableLockManager, TableStatusStore, Watchdog};
use strata_index::{ColumnChangeDetails, ShardConnection, TableIndex};
use strata_query::{
    Compiled, QueryCompiler, QueryExecutor, QueryOptions, QueryRequest, QueryResultBundle,
    RowHandler,
};
use strata_schema::{schema_hash, ColumnModel, ColumnRegistry};
use strata_truth::{
    ChangeType, ColumnChange, Row, RowReferenceSet, RowSet, SparseChangeSet, TransactionLedger,
    TruthStore,
};

/// One column replacement in a schema-change request: add (`old` absent),
/// remove (`new` absent), or replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChangeRequest {
    /// The bound column to remove or replace.
    pub old_column_id: Option<ColumnId>,
    /// The registered column to add or substitute.
    pub new_column_id: Option<ColumnId>,
}

/// The kinds of update a table transaction can carry.
///
/// A closed set dispatched exhaustively in [`TableManager::apply_update`];
/// adding a kind is a compile-time exhaustiveness failure at that single
/// match, not a runtime type test.
#[derive(Debug, Clone)]
pub enum UpdateRequest {
    /// Append a batch of row inserts/updates/deletes.
    Data {
        /// The rows to append.
        row_set: RowSet,
    },
    /// Change the table's bound schema.
    Schema {
        /// The column replacements to apply.
        changes: Vec<SchemaChangeRequest>,
    },
}

/// What an applied update produced.
#[derive(Debug, Clone)]
pub enum UpdateResponse {
    /// References for an applied data change.
    Data(RowReferenceSet),
    /// The new bound schema after a schema change.
    Schema(Vec<ColumnModel>),
}

/// The table manager.
pub struct TableManager {
    registry: Arc<ColumnRegistry>,
    truth: Arc<TruthStore>,
    ledger: Arc<TransactionLedger>,
    locks: Arc<TableLockManager>,
    status: Arc<TableStatusStore>,
    compiler: QueryCompiler,
    executor: QueryExecutor,
    connection: Arc<ShardConnection>,
    indices: DashMap<TableIdAndVersion, Arc<TableIndex>>,
    watchdog: Option<(HeartbeatConfig, Arc<dyn Watchdog>)>,
}

impl TableManager {
    /// Wires a manager over its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<ColumnRegistry>,
        truth: Arc<TruthStore>,
        ledger: Arc<TransactionLedger>,
        locks: Arc<TableLockManager>,
        status: Arc<TableStatusStore>,
        compiler: QueryCompiler,
        executor: QueryExecutor,
        connection: Arc<ShardConnection>,
    ) -> Self {
        Self {
            registry,
            truth,
            ledger,
            locks,
            status,
            compiler,
            executor,
            connection,
            indices: DashMap::new(),
            watchdog: None,
        }
    }

    /// Installs a liveness watchdog serviced during long index builds.
    #[must_use]
    pub fn with_watchdog(mut self, config: HeartbeatConfig, watchdog: Arc<dyn Watchdog>) -> Self {
        self.watchdog = Some((config, watchdog));
        self
    }

    /// The index bound to a table, created lazily on its shard
    /// connection.
    #[must_use]
    pub fn index_for(&self, table: TableIdAndVersion) -> Arc<TableIndex> {
        self.indices
            .entry(table)
            .or_insert_with(|| Arc::new(TableIndex::new(self.connection.clone(), table)))
            .clone()
    }

    // =========================================================================
    // Update dispatch
    // =========================================================================

    /// Applies one update within a logical table transaction.
    ///
    /// This is the single dispatch point over update kinds.
    pub fn apply_update(
        &self,
        actor: &str,
        table_id: TableId,
        request: UpdateRequest,
    ) -> StrataResult<UpdateResponse> {
        let transaction = self.ledger.start_transaction(table_id, actor);
        match request {
            UpdateRequest::Data { row_set } => {
                let refs = self.append_rows(actor, table_id, row_set, transaction.transaction_id)?;
                Ok(UpdateResponse::Data(refs))
            }
            UpdateRequest::Schema { changes } => {
                let schema =
                    self.update_schema(actor, table_id, &changes, transaction.transaction_id)?;
                Ok(UpdateResponse::Schema(schema))
            }
        }
    }

    /// Appends rows to a table's truth: validate, lease, reserve,
    /// conflict-check, persist, reset status.
    fn append_rows(
        &self,
        actor: &str,
        table_id: TableId,
        row_set: RowSet,
        transaction_id: TransactionId,
    ) -> StrataResult<RowReferenceSet> {
        row_set.validate()?;
        let columns = self.registry.get_bound_schema(table_id)?;
        if columns.is_empty() {
            return Err(StrataError::invalid_argument(format!(
                "table {table_id} has no columns bound; bind a schema before appending rows"
            )));
        }
        let live = TableIdAndVersion::live(table_id);
        let _lease = self.locks.write_lease(live)?;

        let refs = self.truth.append_row_set(actor, table_id, &columns, row_set)?;
        if let Some(first) = refs.rows.first() {
            self.ledger.link_version(transaction_id, first.version)?;
        }
        // The truth moved on; the index must catch up before queries run.
        self.status.reset_to_processing(live);
        Ok(refs)
    }

    /// Deletes rows by id. Unversioned deletions are deliberate
    /// last-writer-wins removals.
    pub fn delete_rows(
        &self,
        actor: &str,
        table_id: TableId,
        row_ids: &[RowId],
    ) -> StrataResult<RowReferenceSet> {
        let columns = self.registry.get_bound_schema(table_id)?;
        let header: Vec<ColumnId> = columns.iter().map(|c| c.id).collect();
        let rows = row_ids
            .iter()
            .map(|row_id| Row {
                row_id: Some(*row_id),
                version: None,
                etag: None,
                values: None,
            })
            .collect();
        let row_set = RowSet::new(table_id, header, rows);
        match self.apply_update(actor, table_id, UpdateRequest::Data { row_set })? {
            UpdateResponse::Data(refs) => Ok(refs),
            UpdateResponse::Schema(_) => unreachable!("data request"),
        }
    }

    /// Appends a sparse change set (the CSV import path).
    ///
    /// Inserts take their cells directly (unset cells pick up defaults at
    /// validation); updates merge the supplied cells over the row's
    /// current truth values; rows with no cells at all are deletions.
    pub fn append_sparse_rows(
        &self,
        actor: &str,
        table_id: TableId,
        change_set: SparseChangeSet,
    ) -> StrataResult<RowReferenceSet> {
        let columns = self.registry.get_bound_schema(table_id)?;
        let header: Vec<ColumnId> = columns.iter().map(|c| c.id).collect();

        // Fetch current values for every referenced update row in one
        // read.
        let update_ids: Vec<RowId> = change_set
            .rows
            .iter()
            .filter(|r| !r.is_deletion())
            .filter_map(|r| r.row_id)
            .collect();
        let current = if update_ids.is_empty() {
            None
        } else {
            Some(
                self.truth
                    .get_latest_rows(table_id, &update_ids, RowVersion::FIRST)?,
            )
        };

        let mut rows = Vec::with_capacity(change_set.rows.len());
        for sparse in &change_set.rows {
            let Some(cells) = &sparse.values else {
                let row_id = sparse.row_id.ok_or_else(|| {
                    StrataError::invalid_argument("a deletion row must carry a row id")
                })?;
                rows.push(Row {
                    row_id: Some(row_id),
                    version: sparse.version,
                    etag: sparse.etag.clone(),
                    values: None,
                });
                continue;
            };
            let values = columns
                .iter()
                .map(|column| match cells.get(&column.id) {
                    Some(value) => value.clone(),
                    None => match (sparse.row_id, &current) {
                        // Update: an unset cell keeps its current value.
                        (Some(row_id), Some(current)) => {
                            current.cell(row_id, column.id).unwrap_or(None)
                        }
                        // Insert: unset resolves to the default later.
                        _ => None,
                    },
                })
                .collect();
            rows.push(Row {
                row_id: sparse.row_id,
                version: sparse.version,
                etag: sparse.etag.clone(),
                values: Some(values),
            });
        }
        let mut row_set = RowSet::new(table_id, header, rows);
        row_set.etag = change_set.etag.clone();
        match self.apply_update(actor, table_id, UpdateRequest::Data { row_set })? {
            UpdateResponse::Data(refs) => Ok(refs),
            UpdateResponse::Schema(_) => unreachable!("data request"),
        }
    }

    /// Applies a schema change: validate against a temporary index copy,
    /// record the ledger entry, rebind the columns, reset status.
    fn update_schema(
        &self,
        actor: &str,
        table_id: TableId,
        changes: &[SchemaChangeRequest],
        transaction_id: TransactionId,
    ) -> StrataResult<Vec<ColumnModel>> {
        if changes.is_empty() {
            return Err(StrataError::invalid_argument(
                "a schema change must name at least one column change",
            ));
        }
        let live = TableIdAndVersion::live(table_id);
        let current_ids = self.registry.get_bound_column_ids(table_id);

        // Resolve every referenced column before taking any lock.
        let mut details = Vec::with_capacity(changes.len());
        let mut new_ids = current_ids.clone();
        for change in changes {
            let old = change
                .old_column_id
                .map(|id| self.registry.get_column(id))
                .transpose()?;
            let new = change
                .new_column_id
                .map(|id| self.registry.get_column(id))
                .transpose()?;
            match (&old, &new) {
                (None, None) => {
                    return Err(StrataError::invalid_argument(
                        "a column change must name an old or a new column",
                    ))
                }
                (Some(old), None) => new_ids.retain(|id| *id != old.id),
                (None, Some(new)) => new_ids.push(new.id),
                (Some(old), Some(new)) => {
                    match new_ids.iter().position(|id| *id == old.id) {
                        Some(position) => new_ids[position] = new.id,
                        None => new_ids.push(new.id),
                    }
                }
            }
            details.push(ColumnChangeDetails {
                old_column: old,
                new_column: new,
            });
        }

        let _lease = self.locks.write_lease(live)?;
        let index = self.index_for(live);

        // Validate the prospective change against a temporary copy; the
        // copy is dropped on both paths.
        let _heartbeat = self.start_heartbeat();
        index.create_temporary_copy();
        let valid = index.alter_temp_schema(&details);
        index.delete_temporary_copy();
        valid?;

        let ledger_changes: Vec<ColumnChange> = changes
            .iter()
            .map(|c| ColumnChange {
                old_column_id: c.old_column_id,
                new_column_id: c.new_column_id,
            })
            .collect();
        let version = self
            .truth
            .append_schema_change(actor, table_id, &current_ids, &ledger_changes)?;
        self.ledger.link_version(transaction_id, version)?;
        self.registry.bind_columns_to_object(table_id, new_ids)?;
        self.status.reset_to_processing(live);
        self.registry.get_bound_schema(table_id)
    }

    fn start_heartbeat(&self) -> Option<Heartbeat> {
        self.watchdog
            .as_ref()
            .map(|(config, watchdog)| Heartbeat::start(config.clone(), watchdog.clone()))
    }

    // =========================================================================
    // Index synchronization
    // =========================================================================

    /// Rebuilds a table's index up to the truth's current version.
    ///
    /// Under the exclusive lease: reset status (issuing the token), align
    /// the index schema, replay unapplied changes in version order with
    /// progress updates, optimize secondary indices, and mark the table
    /// available with the last change's etag - or failed with the error.
    pub fn build_index_to_latest(&self, table_id: TableId) -> StrataResult<()> {
        let live = TableIdAndVersion::live(table_id);
        let _lease = self.locks.write_lease(live)?;
        let token = self.status.reset_to_processing(live);
        let index = self.index_for(live);
        index.mark_processing();

        match self.apply_changes_to_index(table_id, &index, &token) {
            Ok(last_etag) => {
                index.mark_in_sync();
                self.status
                    .attempt_set_available(live, &token, last_etag.as_deref())?;
                info!(%table_id, "index built to latest");
                Ok(())
            }
            Err(e) => {
                warn!(%table_id, error = %e, "index build failed");
                index.mark_failed(e.to_string());
                self.status
                    .attempt_set_failed(live, &token, &e.to_string(), None)?;
                Err(e)
            }
        }
    }

    fn apply_changes_to_index(
        &self,
        table_id: TableId,
        index: &TableIndex,
        token: &str,
    ) -> StrataResult<Option<String>> {
        let live = TableIdAndVersion::live(table_id);
        let _heartbeat = self.start_heartbeat();
        let schema = self.registry.get_bound_schema(table_id)?;
        index.set_schema(&schema);

        let changes = self.truth.list_changes(table_id);
        let total = changes.len() as u64;
        let mut last_etag = None;
        for (position, change) in changes.into_iter().enumerate() {
            last_etag = Some(change.etag.clone());
            if index.is_version_applied(change.row_version) {
                continue;
            }
            match change.change_type {
                ChangeType::Row => {
                    let set = self.truth.get_change_set(table_id, change.row_version)?;
                    index.apply_change_set(&set, &schema, change.row_version)?;
                }
                ChangeType::Column => {
                    // The bound schema already reflects this change; only
                    // the version marker needs to advance.
                    index.set_version(Some(change.row_version));
                }
            }
            self.status.attempt_update_progress(
                live,
                token,
                &format!("applied change {}", change.row_version),
                position as u64 + 1,
                total,
            )?;
        }
        index.optimize_indices();
        Ok(last_etag)
    }

    /// True when the index's stored hash and version match the truth.
    #[must_use]
    pub fn index_synchronized(&self, table_id: TableId) -> bool {
        let live = TableIdAndVersion::live(table_id);
        let index = self.index_for(live);
        let ids = self.registry.get_bound_column_ids(table_id);
        index.is_synchronized(&schema_hash(&ids), self.truth.current_version(table_id))
    }

    // =========================================================================
    // Query surface
    // =========================================================================

    /// Compiles and runs a query for a principal.
    pub fn query(
        &self,
        principal: &str,
        request: &QueryRequest,
        options: QueryOptions,
        handler: Option<&mut dyn RowHandler>,
    ) -> StrataResult<QueryResultBundle> {
        self.query_with_benefactors(principal, request, options, &[], handler)
    }

    /// Like [`TableManager::query`], for views whose rows are visible
    /// only through the listed benefactor columns.
    pub fn query_with_benefactors(
        &self,
        principal: &str,
        request: &QueryRequest,
        options: QueryOptions,
        benefactors: &[strata_query::BenefactorDependency],
        handler: Option<&mut dyn RowHandler>,
    ) -> StrataResult<QueryResultBundle> {
        let parsed = strata_query::parser::parse_query(&request.sql)?;
        let table_id = parsed.table_id;
        let schema = self.registry.get_bound_schema(table_id)?;
        let index = self.index_for(TableIdAndVersion::live(table_id));
        let compiled: Compiled =
            self.compiler
                .compile(principal, request, &schema, benefactors, &index)?;
        self.executor.execute(
            &index,
            &compiled,
            options,
            || self.index_synchronized(table_id),
            handler,
        )
    }

    /// Runs the follow-up query a continuation token stands for.
    pub fn query_next_page(
        &self,
        principal: &str,
        token: &str,
    ) -> StrataResult<QueryResultBundle> {
        let token = strata_query::NextPageToken::decode(token)?;
        self.query(
            principal,
            &token.to_request(),
            QueryOptions::rows_only(),
            None,
        )
    }

    // =========================================================================
    // Historical reads
    // =========================================================================

    /// Reads the exact historical values for previously written rows.
    pub fn get_row_set_originals(
        &self,
        refs: &RowReferenceSet,
    ) -> StrataResult<RowSet> {
        let columns = self.registry.get_bound_schema(refs.table_id)?;
        self.truth.get_row_set_originals(refs, &columns)
    }

    /// Reads one change set re-projected onto the current schema.
    pub fn get_row_set(
        &self,
        table_id: TableId,
        version: RowVersion,
    ) -> StrataResult<RowSet> {
        let columns = self.registry.get_bound_schema(table_id)?;
        self.truth.get_row_set(table_id, version, &columns)
    }

    /// The latest `(row id, version)` map for the given rows.
    pub fn get_latest_versions(
        &self,
        table_id: TableId,
        row_ids: &[RowId],
    ) -> StrataResult<BTreeMap<RowId, RowVersion>> {
        let versions = self
            .truth
            .get_latest_versions(table_id, row_ids, RowVersion::FIRST)?;
        Ok(versions.into_iter().collect())
    }
}
