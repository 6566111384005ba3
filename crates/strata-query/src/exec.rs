//! Query execution against the table index.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use strata_cache::{QueryCache, QueryCacheKey};
use strata_common::config::QueryConfig;
use strata_common::constants::{MAX_FACET_CATEGORIES, NULL_VALUE_KEYWORD};
use strata_common::types::{ColumnId, RowId, TableState};
use strata_common::{StrataError, StrataResult};
use strata_coord::{TableLockManager, TableStatusStore};
use strata_index::{IndexRow, TableIndex};
use strata_schema::{ColumnModel, ColumnType, FacetType};

use crate::compile::{Compiled, CompiledQuery, FacetPlan, Filter};
use crate::model::{
    FacetResult, NextPageToken, QueryOptions, QueryResultBundle, QueryRow, SortDirection,
    SumFileSizes,
};
use crate::parser::CompareOp;

/// Receives result rows as they stream.
///
/// Returning `Ok(false)` abandons the query: streaming stops promptly,
/// though an in-flight cache-population write still completes so the next
/// caller is not a miss again.
pub trait RowHandler {
    /// Handles one row; return `Ok(false)` to stop streaming.
    fn on_row(&mut self, row: &QueryRow) -> StrataResult<bool>;
}

/// Resolves file-reference ids to their sizes in bytes.
pub trait FileSizeResolver: Send + Sync {
    /// The size of one stored file, or 0 when unknown.
    fn file_size_bytes(&self, file_ref: u64) -> u64;
}

/// Used when no resolver is configured; every file reports size 0.
struct NoFileSizes;

impl FileSizeResolver for NoFileSizes {
    fn file_size_bytes(&self, _file_ref: u64) -> u64 {
        0
    }
}

/// Observes cache hits and live executions.
pub trait QueryEventListener: Send + Sync {
    /// A request was served from the cache.
    fn cache_hit(&self, key: QueryCacheKey);
    /// A request executed live, taking `latency`.
    fn executed(&self, key: QueryCacheKey, latency: Duration);
}

struct NullListener;

impl QueryEventListener for NullListener {
    fn cache_hit(&self, _key: QueryCacheKey) {}
    fn executed(&self, _key: QueryCacheKey, _latency: Duration) {}
}

/// Executes compiled queries under the table read lease.
pub struct QueryExecutor {
    locks: Arc<TableLockManager>,
    status: Arc<TableStatusStore>,
    cache: Arc<QueryCache<Vec<QueryRow>>>,
    config: QueryConfig,
    file_sizes: Arc<dyn FileSizeResolver>,
    listener: Arc<dyn QueryEventListener>,
    /// Compiled queries by cache key, kept so the background refresher
    /// can re-execute an expired entry without a caller.
    registered: RwLock<HashMap<QueryCacheKey, CompiledQuery>>,
}

impl QueryExecutor {
    /// Creates an executor over the given coordination and cache
    /// capabilities.
    #[must_use]
    pub fn new(
        locks: Arc<TableLockManager>,
        status: Arc<TableStatusStore>,
        cache: Arc<QueryCache<Vec<QueryRow>>>,
        config: QueryConfig,
    ) -> Self {
        Self {
            locks,
            status,
            cache,
            config,
            file_sizes: Arc::new(NoFileSizes),
            listener: Arc::new(NullListener),
            registered: RwLock::new(HashMap::new()),
        }
    }

    /// Installs a file-size resolver for sum-of-file-sizes requests.
    #[must_use]
    pub fn with_file_sizes(mut self, resolver: Arc<dyn FileSizeResolver>) -> Self {
        self.file_sizes = resolver;
        self
    }

    /// Installs an event listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn QueryEventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Runs a compiled query.
    ///
    /// Takes the table read lease for the whole execution (main query and
    /// every sub-query see one consistent index state), checks the table
    /// is `Available` (using `index_synchronized` to spot staleness), and
    /// assembles the parts selected by `options`. Rows stream to
    /// `handler` when one is supplied.
    pub fn execute(
        &self,
        index: &TableIndex,
        compiled: &Compiled,
        options: QueryOptions,
        index_synchronized: impl FnOnce() -> bool,
        mut handler: Option<&mut dyn RowHandler>,
    ) -> StrataResult<QueryResultBundle> {
        let plan = match compiled {
            Compiled::Empty { .. } => return Ok(Self::empty_bundle(options)),
            Compiled::Plan(plan) => plan.as_ref(),
        };

        let _lease = self.locks.read_lease(plan.table)?;
        let status = self
            .status
            .get_or_create_status(plan.table, index_synchronized);
        match status.state {
            TableState::Available => {}
            TableState::Processing => {
                return Err(StrataError::TableUnavailable {
                    table: plan.table,
                    state: status.state,
                })
            }
            TableState::ProcessingFailed => {
                return Err(StrataError::TableFailed {
                    table: plan.table,
                    message: status.error_message.unwrap_or_default(),
                })
            }
        }

        let mut bundle = QueryResultBundle::default();
        if options.return_select_columns {
            bundle.select_columns =
                Some(plan.select_columns.iter().map(|c| c.name.clone()).collect());
        }
        if options.return_column_models {
            bundle.column_models = Some(plan.schema.clone());
        }
        if options.return_max_rows_per_page {
            bundle.max_rows_per_page = Some(plan.max_rows_per_page);
        }
        if options.return_last_updated_on {
            bundle.last_updated_on = self.status.last_changed_on(plan.table);
        }

        if options.run_query {
            let page_size = self.effective_page_size(plan);
            let rows = self.main_rows(index, plan)?;
            bundle.etag = status.last_change_etag.clone();
            if rows.len() as u64 == page_size {
                let token = NextPageToken {
                    v: NextPageToken::VERSION,
                    sql: plan.request.sql.clone(),
                    sort: plan.request.sort.clone(),
                    offset: plan.offset + page_size,
                    limit: plan.limit,
                    selected_facets: plan.request.selected_facets.clone(),
                };
                bundle.next_page_token = Some(token.encode());
            }
            if let Some(handler) = handler.as_deref_mut() {
                for row in &rows {
                    if !handler.on_row(row)? {
                        debug!(table = %plan.table, "caller abandoned streaming");
                        break;
                    }
                }
            }
            bundle.rows = Some(rows);
        }

        if options.run_count {
            bundle.count = Some(self.count_rows(index, plan));
        }
        if options.return_facets {
            let facets = plan
                .facet_plans
                .iter()
                .map(|facet| self.facet_stats(index, facet))
                .collect();
            bundle.facets = Some(facets);
        }
        if options.run_sum_file_sizes {
            bundle.sum_file_sizes = Some(self.sum_file_sizes(index, plan));
        }
        Ok(bundle)
    }

    /// Re-executes expired cached queries so their entries are warm
    /// before the next caller arrives.
    ///
    /// Returns the number of entries refreshed. Queries whose plan is no
    /// longer registered are dropped.
    pub fn refresh_expired(&self, index: &TableIndex) -> StrataResult<usize> {
        let expired = self.cache.take_expired_keys();
        let mut refreshed = 0;
        for key in expired {
            let plan = self.registered.read().get(&key).cloned();
            if let Some(plan) = plan {
                let _lease = self.locks.read_lease(plan.table)?;
                let rows = self.compute_rows(index, &plan);
                self.cache.put(key, plan.table.table_id, rows);
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// The page size actually enforced: the plan's schema-derived bound,
    /// clamped by the executor's own configured ceiling.
    fn effective_page_size(&self, plan: &CompiledQuery) -> u64 {
        plan.max_rows_per_page
            .min(self.config.max_rows_per_page as u64)
            .max(1)
    }

    fn empty_bundle(options: QueryOptions) -> QueryResultBundle {
        let mut bundle = QueryResultBundle::default();
        if options.run_query {
            bundle.rows = Some(Vec::new());
        }
        if options.run_count {
            bundle.count = Some(0);
        }
        if options.return_facets {
            bundle.facets = Some(Vec::new());
        }
        if options.run_sum_file_sizes {
            bundle.sum_file_sizes = Some(SumFileSizes {
                sum_bytes: 0,
                greater_than: false,
            });
        }
        if options.return_select_columns {
            bundle.select_columns = Some(Vec::new());
        }
        if options.return_column_models {
            bundle.column_models = Some(Vec::new());
        }
        if options.return_max_rows_per_page {
            bundle.max_rows_per_page = Some(1);
        }
        bundle
    }

    /// The main query: serve from cache or execute live and store.
    fn main_rows(&self, index: &TableIndex, plan: &CompiledQuery) -> StrataResult<Vec<QueryRow>> {
        let key = QueryCacheKey::from_request(plan);
        if let Some(cached) = self.cache.get(key) {
            self.listener.cache_hit(key);
            debug!(table = %plan.table, key = key.as_u64(), "query cache hit");
            return Ok(cached.as_ref().clone());
        }
        let started = Instant::now();
        let rows = self.compute_rows(index, plan);
        self.registered.write().insert(key, plan.clone());
        self.cache.put(key, plan.table.table_id, rows.clone());
        self.listener.executed(key, started.elapsed());
        Ok(rows)
    }

    /// Filters, sorts, paginates, and projects the index's rows.
    fn compute_rows(&self, index: &TableIndex, plan: &CompiledQuery) -> Vec<QueryRow> {
        let mut matched = self.matching_rows(index, plan.filter.as_ref());
        if !plan.sort.is_empty() {
            matched.sort_by(|(_, a), (_, b)| {
                for (column, direction) in &plan.sort {
                    let ordering = compare_cells(
                        cell_of(a, column.id),
                        cell_of(b, column.id),
                        column.column_type,
                    );
                    let ordering = match direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        let page_limit = plan
            .limit
            .unwrap_or(u64::MAX)
            .min(self.effective_page_size(plan)) as usize;
        matched
            .into_iter()
            .skip(plan.offset as usize)
            .take(page_limit)
            .map(|(row_id, row)| QueryRow {
                row_id,
                version: row.version,
                etag: if plan.include_row_etag {
                    row.etag.clone()
                } else {
                    None
                },
                values: plan
                    .select_columns
                    .iter()
                    .map(|column| row.cells.get(&column.id).cloned().unwrap_or(None))
                    .collect(),
            })
            .collect()
    }

    /// The derived count: matching rows with the SQL's own LIMIT/OFFSET
    /// re-applied manually, since `COUNT(*)` would ignore them.
    fn count_rows(&self, index: &TableIndex, plan: &CompiledQuery) -> u64 {
        let mut count = self.matching_rows(index, plan.filter.as_ref()).len() as u64;
        if let Some(offset) = plan.sql_offset {
            count = count.saturating_sub(offset);
        }
        if let Some(limit) = plan.sql_limit {
            count = count.min(limit);
        }
        count
    }

    fn facet_stats(&self, index: &TableIndex, facet: &FacetPlan) -> FacetResult {
        let rows = self.matching_rows(index, facet.filter.as_ref());
        match facet.facet_type {
            FacetType::Enumeration => {
                let mut counts: BTreeMap<String, u64> = BTreeMap::new();
                for (_, row) in &rows {
                    let rendered = match cell_of(row, facet.column.id) {
                        Some(value) => value.to_string(),
                        None => NULL_VALUE_KEYWORD.to_string(),
                    };
                    *counts.entry(rendered).or_insert(0) += 1;
                }
                let mut values: Vec<(String, u64)> = counts.into_iter().collect();
                values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                values.truncate(MAX_FACET_CATEGORIES);
                FacetResult::ValueCounts {
                    column: facet.column.name.clone(),
                    values,
                }
            }
            FacetType::Range => {
                let mut min: Option<&str> = None;
                let mut max: Option<&str> = None;
                for (_, row) in &rows {
                    let Some(value) = cell_of(row, facet.column.id) else {
                        continue;
                    };
                    let smaller = min
                        .map(|m| {
                            compare_cells(Some(value), Some(m), facet.column.column_type)
                                == Ordering::Less
                        })
                        .unwrap_or(true);
                    if smaller {
                        min = Some(value);
                    }
                    let larger = max
                        .map(|m| {
                            compare_cells(Some(value), Some(m), facet.column.column_type)
                                == Ordering::Greater
                        })
                        .unwrap_or(true);
                    if larger {
                        max = Some(value);
                    }
                }
                FacetResult::Range {
                    column: facet.column.name.clone(),
                    min: min.map(str::to_string),
                    max: max.map(str::to_string),
                }
            }
        }
    }

    /// Sums the file sizes referenced by matching rows, sampling at most
    /// one page of rows; `greater_than` marks a truncated sample.
    fn sum_file_sizes(&self, index: &TableIndex, plan: &CompiledQuery) -> SumFileSizes {
        let matched = self.matching_rows(index, plan.filter.as_ref());
        let cap = plan.max_rows_per_page as usize;
        let greater_than = matched.len() > cap;
        let file_columns: Vec<ColumnId> = plan
            .schema
            .iter()
            .filter(|c| c.column_type == ColumnType::FileRef)
            .map(|c| c.id)
            .collect();
        let mut sum_bytes = 0u64;
        for (_, row) in matched.into_iter().take(cap) {
            for column in &file_columns {
                if let Some(value) = cell_of(&row, *column) {
                    if let Ok(file_ref) = value.parse::<u64>() {
                        sum_bytes += self.file_sizes.file_size_bytes(file_ref);
                    }
                }
            }
        }
        SumFileSizes {
            sum_bytes,
            greater_than,
        }
    }

    /// All rows matching a filter, in row-id order. One statement on the
    /// shard connection; sub-queries run one at a time, never fanned out.
    fn matching_rows(
        &self,
        index: &TableIndex,
        filter: Option<&Filter>,
    ) -> Vec<(RowId, IndexRow)> {
        index.connection().read(index.physical_name(), |table| {
            let Some(table) = table else {
                return Vec::new();
            };
            table
                .rows
                .iter()
                .filter(|(_, row)| filter.map(|f| eval_filter(f, row)).unwrap_or(true))
                .map(|(row_id, row)| (*row_id, row.clone()))
                .collect()
        })
    }
}

fn cell_of(row: &IndexRow, column_id: ColumnId) -> Option<&str> {
    row.cells.get(&column_id).and_then(|v| v.as_deref())
}

/// Evaluates a resolved filter against one row. Null cells fail every
/// test except `IS NULL`.
fn eval_filter(filter: &Filter, row: &IndexRow) -> bool {
    match filter {
        Filter::Compare { column, op, value } => {
            let (Some(cell), Some(literal)) = (cell_of(row, column.id), value.as_deref()) else {
                return false;
            };
            let ordering = compare_typed(cell, literal, column.column_type);
            match (ordering, op) {
                (None, _) => false,
                (Some(o), CompareOp::Eq) => o == Ordering::Equal,
                (Some(o), CompareOp::Ne) => o != Ordering::Equal,
                (Some(o), CompareOp::Lt) => o == Ordering::Less,
                (Some(o), CompareOp::Le) => o != Ordering::Greater,
                (Some(o), CompareOp::Gt) => o == Ordering::Greater,
                (Some(o), CompareOp::Ge) => o != Ordering::Less,
            }
        }
        Filter::In {
            column,
            values,
            negated,
        } => {
            let Some(cell) = cell_of(row, column.id) else {
                return false;
            };
            let found = values.iter().any(|v| {
                compare_typed(cell, v, column.column_type) == Some(Ordering::Equal)
            });
            found != *negated
        }
        Filter::Between {
            column,
            low,
            high,
            negated,
        } => {
            let Some(cell) = cell_of(row, column.id) else {
                return false;
            };
            let above = compare_typed(cell, low, column.column_type)
                .map(|o| o != Ordering::Less)
                .unwrap_or(false);
            let below = compare_typed(cell, high, column.column_type)
                .map(|o| o != Ordering::Greater)
                .unwrap_or(false);
            (above && below) != *negated
        }
        Filter::IsNull { column, negated } => {
            (cell_of(row, column.id).is_none()) != *negated
        }
        Filter::Like {
            column,
            pattern,
            negated,
        } => {
            let Some(cell) = cell_of(row, column.id) else {
                return false;
            };
            like_match(cell, pattern) != *negated
        }
        Filter::And(parts) => parts.iter().all(|p| eval_filter(p, row)),
        Filter::Or(parts) => parts.iter().any(|p| eval_filter(p, row)),
        Filter::Not(inner) => !eval_filter(inner, row),
    }
}

/// Orders two non-null cells for sorting; nulls sort last.
fn compare_cells(a: Option<&str>, b: Option<&str>, column_type: ColumnType) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_typed(a, b, column_type).unwrap_or(Ordering::Equal),
    }
}

/// Compares two rendered cell values by their column type.
fn compare_typed(a: &str, b: &str, column_type: ColumnType) -> Option<Ordering> {
    match column_type {
        ColumnType::Integer | ColumnType::Date | ColumnType::FileRef => {
            let a = a.parse::<i64>().ok()?;
            let b = b.parse::<i64>().ok()?;
            Some(a.cmp(&b))
        }
        ColumnType::Double => {
            let a = a.parse::<f64>().ok()?;
            let b = b.parse::<f64>().ok()?;
            a.partial_cmp(&b)
        }
        ColumnType::Boolean => {
            let a = a.parse::<bool>().ok()?;
            let b = b.parse::<bool>().ok()?;
            Some(a.cmp(&b))
        }
        ColumnType::Text | ColumnType::Link => Some(a.cmp(b)),
    }
}

/// SQL LIKE matching with `%` (any run) and `_` (any one) wildcards.
fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    // Backtracking match: remember the last `%` position and retry from
    // there on mismatch.
    let (mut v, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == value[v]) {
            v += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, v));
            p += 1;
        } else if let Some((star_p, star_v)) = star {
            p = star_p + 1;
            v = star_v + 1;
            star = Some((star_p, star_v + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '%' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use strata_cache::QueryCacheConfig;
    use strata_common::config::{LeaseConfig, StatusConfig};
    use strata_common::types::{RowVersion, TableId, TableIdAndVersion};
    use strata_index::ShardConnection;
    use strata_truth::{Row, RowSet};

    use crate::compile::{AccessChecker, QueryCompiler};
    use crate::model::QueryRequest;

    struct AllowAll;
    impl AccessChecker for AllowAll {
        fn accessible_benefactors(
            &self,
            _principal: &str,
            _benefactor_type: &str,
            candidates: &std::collections::BTreeSet<i64>,
        ) -> std::collections::BTreeSet<i64> {
            candidates.clone()
        }
    }

    struct Fixture {
        index: TableIndex,
        schema: Vec<ColumnModel>,
        executor: QueryExecutor,
        compiler: QueryCompiler,
        status: Arc<TableStatusStore>,
    }

    impl Fixture {
        fn compile(&self, request: &QueryRequest) -> Compiled {
            self.compiler
                .compile("user", request, &self.schema, &[], &self.index)
                .unwrap()
        }

        fn run(&self, request: &QueryRequest, options: QueryOptions) -> QueryResultBundle {
            let compiled = self.compile(request);
            self.executor
                .execute(&self.index, &compiled, options, || true, None)
                .unwrap()
        }
    }

    /// Ten rows: name0..name9, size = i, flag alternates, file = 10+i.
    fn fixture() -> Fixture {
        let schema = vec![
            ColumnModel::new("name", ColumnType::Text).with_facet(FacetType::Enumeration),
            ColumnModel::new("size", ColumnType::Integer).with_facet(FacetType::Range),
            ColumnModel::new("flag", ColumnType::Boolean),
            ColumnModel::new("file", ColumnType::FileRef),
        ];
        let index = TableIndex::new(
            Arc::new(ShardConnection::new()),
            TableIdAndVersion::live(TableId::new(1)),
        );
        index.set_schema(&schema);
        let mut set = RowSet::new(
            TableId::new(1),
            schema.iter().map(|c| c.id).collect(),
            (0..10)
                .map(|i| {
                    Row::insert(vec![
                        Some(format!("name{i}")),
                        Some(i.to_string()),
                        Some((i % 2 == 0).to_string()),
                        Some((10 + i).to_string()),
                    ])
                })
                .collect(),
        );
        for (i, row) in set.rows.iter_mut().enumerate() {
            row.row_id = Some(RowId::new(i as u64));
            row.version = Some(RowVersion::new(0));
        }
        index
            .apply_change_set(&set, &schema, RowVersion::new(0))
            .unwrap();

        let status = Arc::new(TableStatusStore::new(StatusConfig::default()));
        let token = status.reset_to_processing(index.table());
        status
            .attempt_set_available(index.table(), &token, Some("etag-0"))
            .unwrap();

        let executor = QueryExecutor::new(
            Arc::new(TableLockManager::new(LeaseConfig::default())),
            status.clone(),
            Arc::new(QueryCache::new(QueryCacheConfig::default())),
            QueryConfig::default(),
        );
        let compiler = QueryCompiler::new(QueryConfig::default(), Arc::new(AllowAll));
        Fixture {
            index,
            schema,
            executor,
            compiler,
            status,
        }
    }

    #[test]
    fn test_filter_sort_and_project() {
        let fixture = fixture();
        let bundle = fixture.run(
            &QueryRequest::sql("SELECT name, size FROM t1 WHERE size >= 7 ORDER BY size DESC"),
            QueryOptions::rows_only(),
        );
        let rows = bundle.rows.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].values[0], Some("name9".to_string()));
        assert_eq!(rows[2].values[1], Some("7".to_string()));
        assert_eq!(bundle.etag, Some("etag-0".to_string()));
    }

    #[test]
    fn test_unavailable_table_is_rejected() {
        let fixture = fixture();
        fixture.status.reset_to_processing(fixture.index.table());
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1"));
        let err = fixture
            .executor
            .execute(
                &fixture.index,
                &compiled,
                QueryOptions::rows_only(),
                || true,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StrataError::TableUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failed_table_carries_message() {
        let fixture = fixture();
        let table = fixture.index.table();
        let token = fixture.status.reset_to_processing(table);
        fixture
            .status
            .attempt_set_failed(table, &token, "schema exploded", None)
            .unwrap();
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1"));
        let err = fixture
            .executor
            .execute(
                &fixture.index,
                &compiled,
                QueryOptions::rows_only(),
                || true,
                None,
            )
            .unwrap_err();
        match err {
            StrataError::TableFailed { message, .. } => assert_eq!(message, "schema exploded"),
            other => panic!("expected TableFailed, got {other}"),
        }
    }

    #[test]
    fn test_stale_available_flips_to_processing() {
        let fixture = fixture();
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1"));
        // The probe reports the index behind the truth.
        let err = fixture
            .executor
            .execute(
                &fixture.index,
                &compiled,
                QueryOptions::rows_only(),
                || false,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StrataError::TableUnavailable { .. }));
    }

    #[test]
    fn test_count_reapplies_sql_pagination() {
        let fixture = fixture();
        let bundle = fixture.run(
            &QueryRequest::sql("SELECT * FROM t1 LIMIT 4 OFFSET 8"),
            QueryOptions::none().with_count(),
        );
        // 10 matching rows; offset 8 leaves 2; limit 4 keeps 2.
        assert_eq!(bundle.count, Some(2));

        let bundle = fixture.run(
            &QueryRequest::sql("SELECT * FROM t1 LIMIT 3"),
            QueryOptions::none().with_count(),
        );
        assert_eq!(bundle.count, Some(3));
    }

    #[test]
    fn test_facet_stats() {
        let fixture = fixture();
        let bundle = fixture.run(
            &QueryRequest::sql("SELECT * FROM t1"),
            QueryOptions::none().with_facets(),
        );
        let facets = bundle.facets.unwrap();
        assert_eq!(facets.len(), 2);
        match &facets[0] {
            FacetResult::ValueCounts { column, values } => {
                assert_eq!(column, "name");
                assert_eq!(values.len(), 10);
                assert!(values.iter().all(|(_, count)| *count == 1));
            }
            other => panic!("expected value counts, got {other:?}"),
        }
        match &facets[1] {
            FacetResult::Range { column, min, max } => {
                assert_eq!(column, "size");
                assert_eq!(min.as_deref(), Some("0"));
                assert_eq!(max.as_deref(), Some("9"));
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn test_facet_selection_narrows_main_but_not_own_stats() {
        let fixture = fixture();
        let mut request = QueryRequest::sql("SELECT * FROM t1");
        request.selected_facets.push(crate::model::FacetSelection::Range {
            column: "size".to_string(),
            min: Some("8".to_string()),
            max: None,
        });
        let bundle = fixture.run(
            &request,
            QueryOptions::rows_only().with_facets().with_count(),
        );
        // Main query sees only size >= 8.
        assert_eq!(bundle.rows.unwrap().len(), 2);
        // The size facet's own stats ignore its own filter.
        let facets = bundle.facets.unwrap();
        let range = facets
            .iter()
            .find_map(|f| match f {
                FacetResult::Range { min, max, .. } => Some((min.clone(), max.clone())),
                FacetResult::ValueCounts { .. } => None,
            })
            .unwrap();
        assert_eq!(range.0.as_deref(), Some("0"));
        assert_eq!(range.1.as_deref(), Some("9"));
    }

    #[test]
    fn test_sum_file_sizes() {
        struct Sizes;
        impl FileSizeResolver for Sizes {
            fn file_size_bytes(&self, file_ref: u64) -> u64 {
                file_ref * 100
            }
        }
        let fixture = fixture();
        let executor = QueryExecutor::new(
            Arc::new(TableLockManager::new(LeaseConfig::default())),
            fixture.status.clone(),
            Arc::new(QueryCache::new(QueryCacheConfig::default())),
            QueryConfig::default(),
        )
        .with_file_sizes(Arc::new(Sizes));
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1 WHERE size < 2"));
        let bundle = executor
            .execute(
                &fixture.index,
                &compiled,
                QueryOptions::none().with_sum_file_sizes(),
                || true,
                None,
            )
            .unwrap();
        // Rows 0 and 1 carry file refs 10 and 11.
        assert_eq!(
            bundle.sum_file_sizes,
            Some(SumFileSizes {
                sum_bytes: 2100,
                greater_than: false
            })
        );
    }

    #[test]
    fn test_cache_hit_and_events() {
        struct Events {
            hits: AtomicUsize,
            executions: AtomicUsize,
        }
        impl QueryEventListener for Events {
            fn cache_hit(&self, _key: QueryCacheKey) {
                self.hits.fetch_add(1, AtomicOrdering::SeqCst);
            }
            fn executed(&self, _key: QueryCacheKey, _latency: Duration) {
                self.executions.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }
        let fixture = fixture();
        let events = Arc::new(Events {
            hits: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        });
        let executor = QueryExecutor::new(
            Arc::new(TableLockManager::new(LeaseConfig::default())),
            fixture.status.clone(),
            Arc::new(QueryCache::new(QueryCacheConfig::default())),
            QueryConfig::default(),
        )
        .with_listener(events.clone());
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1"));

        let first = executor
            .execute(&fixture.index, &compiled, QueryOptions::rows_only(), || true, None)
            .unwrap();
        let second = executor
            .execute(&fixture.index, &compiled, QueryOptions::rows_only(), || true, None)
            .unwrap();
        assert_eq!(first.rows, second.rows);
        assert_eq!(events.executions.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(events.hits.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_stream_still_populates_cache() {
        struct StopAfterOne(usize);
        impl RowHandler for StopAfterOne {
            fn on_row(&mut self, _row: &QueryRow) -> StrataResult<bool> {
                self.0 += 1;
                Ok(false)
            }
        }
        let fixture = fixture();
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1"));
        let mut handler = StopAfterOne(0);
        fixture
            .executor
            .execute(
                &fixture.index,
                &compiled,
                QueryOptions::rows_only(),
                || true,
                Some(&mut handler),
            )
            .unwrap();
        assert_eq!(handler.0, 1);

        // The abandoned query's result is cached all the same.
        let cached = fixture
            .executor
            .execute(&fixture.index, &compiled, QueryOptions::rows_only(), || true, None)
            .unwrap();
        assert_eq!(cached.rows.unwrap().len(), 10);
    }

    #[test]
    fn test_next_page_token_on_full_page() {
        let fixture = fixture();
        let mut request = QueryRequest::sql("SELECT * FROM t1");
        request.limit = Some(4);
        // Page size 4 < 10 rows; the page fills, so a token is emitted
        // only when the page equals max_rows_per_page. Force a small page.
        let compiler = QueryCompiler::new(
            QueryConfig {
                max_rows_per_page: 4,
                ..Default::default()
            },
            Arc::new(AllowAll),
        );
        let compiled = compiler
            .compile("user", &request, &fixture.schema, &[], &fixture.index)
            .unwrap();
        let bundle = fixture
            .executor
            .execute(&fixture.index, &compiled, QueryOptions::rows_only(), || true, None)
            .unwrap();
        let token = NextPageToken::decode(&bundle.next_page_token.unwrap()).unwrap();
        assert_eq!(token.offset, 4);
        let follow_up = token.to_request();
        assert_eq!(follow_up.offset, Some(4));
    }

    #[test]
    fn test_refresh_expired_re_executes() {
        let fixture = fixture();
        let cache = Arc::new(QueryCache::new(QueryCacheConfig {
            ttl: Duration::from_secs(0),
            ..Default::default()
        }));
        let executor = QueryExecutor::new(
            Arc::new(TableLockManager::new(LeaseConfig::default())),
            fixture.status.clone(),
            cache.clone(),
            QueryConfig::default(),
        );
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1"));
        executor
            .execute(&fixture.index, &compiled, QueryOptions::rows_only(), || true, None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let refreshed = executor.refresh_expired(&fixture.index).unwrap();
        assert_eq!(refreshed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_empty_compiled_short_circuits() {
        let fixture = fixture();
        let compiled = Compiled::Empty {
            table: fixture.index.table(),
        };
        let bundle = fixture
            .executor
            .execute(
                &fixture.index,
                &compiled,
                QueryOptions::rows_only().with_count(),
                || true,
                None,
            )
            .unwrap();
        assert_eq!(bundle.rows, Some(Vec::new()));
        assert_eq!(bundle.count, Some(0));
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("hello", "h%"));
        assert!(like_match("hello", "%llo"));
        assert!(like_match("hello", "h_llo"));
        assert!(like_match("hello", "%"));
        assert!(!like_match("hello", "h_"));
        assert!(!like_match("hello", "world%"));
        assert!(like_match("a%b", "a%b"));
    }

    #[test]
    fn test_handler_errors_propagate() {
        struct Failing;
        impl RowHandler for Failing {
            fn on_row(&mut self, _row: &QueryRow) -> StrataResult<bool> {
                Err(StrataError::Cancelled)
            }
        }
        let fixture = fixture();
        let compiled = fixture.compile(&QueryRequest::sql("SELECT * FROM t1"));
        let mut handler = Failing;
        let err = fixture
            .executor
            .execute(
                &fixture.index,
                &compiled,
                QueryOptions::rows_only(),
                || true,
                Some(&mut handler),
            )
            .unwrap_err();
        assert!(matches!(err, StrataError::Cancelled));
    }

    #[test]
    fn test_boolean_and_like_filters() {
        let fixture = fixture();
        let bundle = fixture.run(
            &QueryRequest::sql("SELECT name FROM t1 WHERE flag = true AND name LIKE 'name%'"),
            QueryOptions::rows_only(),
        );
        assert_eq!(bundle.rows.unwrap().len(), 5);
    }
}
