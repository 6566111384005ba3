//! Query compilation: schema resolution, filter injection, and plan
//! derivation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use strata_common::config::QueryConfig;
use strata_common::constants::{BENEFACTOR_SENTINEL, NULL_VALUE_KEYWORD};
use strata_common::types::{ColumnId, TableIdAndVersion};
use strata_common::{StrataError, StrataResult};
use strata_index::TableIndex;
use strata_schema::{max_bytes_as_text, ColumnModel, FacetType};

use crate::model::{FacetSelection, QueryRequest, SortDirection};
use crate::parser::{self, CompareOp, ParsedQuery, Predicate, Projection};

/// A predicate resolved against the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    /// `column <op> literal`; a `None` literal matches nothing.
    Compare {
        /// Resolved column.
        column: ColumnModel,
        /// Operator.
        op: CompareOp,
        /// Literal operand.
        value: Option<String>,
    },
    /// `column IN (...)`.
    In {
        /// Resolved column.
        column: ColumnModel,
        /// Accepted values.
        values: Vec<String>,
        /// `NOT IN`.
        negated: bool,
    },
    /// `column BETWEEN low AND high`.
    Between {
        /// Resolved column.
        column: ColumnModel,
        /// Lower bound.
        low: String,
        /// Upper bound.
        high: String,
        /// `NOT BETWEEN`.
        negated: bool,
    },
    /// `column IS [NOT] NULL`.
    IsNull {
        /// Resolved column.
        column: ColumnModel,
        /// `IS NOT NULL`.
        negated: bool,
    },
    /// `column [NOT] LIKE pattern`.
    Like {
        /// Resolved column.
        column: ColumnModel,
        /// Pattern with `%`/`_` wildcards.
        pattern: String,
        /// `NOT LIKE`.
        negated: bool,
    },
    /// Conjunction.
    And(Vec<Filter>),
    /// Disjunction.
    Or(Vec<Filter>),
    /// Negation.
    Not(Box<Filter>),
}

/// The stats plan for one faceted column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FacetPlan {
    /// The faceted column.
    pub column: ColumnModel,
    /// Which summarization to run.
    pub facet_type: FacetType,
    /// The filter for this facet's stats: the base filter plus every
    /// *other* selected facet's filter, but never this facet's own.
    pub filter: Option<Filter>,
}

/// A fully compiled, executable query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledQuery {
    /// The queried table.
    pub table: TableIdAndVersion,
    /// The table's full bound schema.
    pub schema: Vec<ColumnModel>,
    /// The resolved select list, in order.
    pub select_columns: Vec<ColumnModel>,
    /// The main-query filter: user WHERE, additional filters, benefactor
    /// restriction, and every selected facet filter.
    pub filter: Option<Filter>,
    /// The filter without facet selections, used for count post-checks
    /// and facet planning.
    pub base_filter: Option<Filter>,
    /// Sort keys.
    pub sort: Vec<(ColumnModel, SortDirection)>,
    /// Effective row offset (request override, else SQL).
    pub offset: u64,
    /// Effective row limit (request override, else SQL).
    pub limit: Option<u64>,
    /// Pagination written in the SQL itself, re-applied manually to the
    /// count.
    pub sql_offset: Option<u64>,
    /// See `sql_offset`.
    pub sql_limit: Option<u64>,
    /// Page-size bound derived from the schema's maximum row size.
    pub max_rows_per_page: u64,
    /// Facet stats plans, one per faceted column.
    pub facet_plans: Vec<FacetPlan>,
    /// Include each row's etag in the output.
    pub include_row_etag: bool,
    /// The original request, used to mint continuation tokens.
    pub request: QueryRequest,
}

/// The compiler's outcome: a real plan, or the distinguished empty
/// branch for a table with no schema.
#[derive(Debug, Clone)]
pub enum Compiled {
    /// The table's schema is empty; the result is an empty bundle, not an
    /// error.
    Empty {
        /// The queried table.
        table: TableIdAndVersion,
    },
    /// An executable plan.
    Plan(Box<CompiledQuery>),
}

/// Columns that restrict visibility by an owning entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenefactorDependency {
    /// The column holding benefactor ids.
    pub column_id: ColumnId,
    /// The benefactor entity type, passed to the access checker.
    pub benefactor_type: String,
}

/// Answers which benefactors a principal may see. Only the yes/no result
/// of policy evaluation is consumed here.
pub trait AccessChecker: Send + Sync {
    /// Filters `candidates` down to the benefactors `principal` can
    /// access.
    fn accessible_benefactors(
        &self,
        principal: &str,
        benefactor_type: &str,
        candidates: &BTreeSet<i64>,
    ) -> BTreeSet<i64>;
}

/// Compiles query requests into executable plans.
pub struct QueryCompiler {
    config: QueryConfig,
    access: Arc<dyn AccessChecker>,
}

impl QueryCompiler {
    /// Creates a compiler with the given access checker.
    #[must_use]
    pub fn new(config: QueryConfig, access: Arc<dyn AccessChecker>) -> Self {
        Self { config, access }
    }

    /// Compiles a request against a table's schema and index.
    ///
    /// `benefactors` lists the visibility-restricting dependencies of the
    /// queried table (empty for plain tables); the index supplies the
    /// candidate benefactor values actually present.
    pub fn compile(
        &self,
        principal: &str,
        request: &QueryRequest,
        schema: &[ColumnModel],
        benefactors: &[BenefactorDependency],
        index: &TableIndex,
    ) -> StrataResult<Compiled> {
        let parsed = parser::parse_query(&request.sql)?;
        let table = index.table();
        if parsed.table_id != table.table_id {
            return Err(StrataError::invalid_argument(format!(
                "query references table {} but was compiled against table {}",
                parsed.table_id, table.table_id
            )));
        }
        if schema.is_empty() {
            debug!(%table, "empty schema; compiling to the empty branch");
            return Ok(Compiled::Empty { table });
        }

        let select_columns = self.resolve_projection(&parsed, schema)?;
        let user_filter = parsed
            .predicate
            .as_ref()
            .map(|p| resolve_predicate(p, schema))
            .transpose()?;

        let mut base_parts: Vec<Filter> = user_filter.into_iter().collect();
        for condition in &request.additional_filters {
            let predicate = parser::parse_condition(condition)?;
            base_parts.push(resolve_predicate(&predicate, schema)?);
        }
        if let Some(filter) = self.benefactor_filter(principal, benefactors, schema, index)? {
            base_parts.push(filter);
        }
        let base_filter = combine(base_parts);

        let facet_filters = self.resolve_facet_selections(request, schema)?;
        let mut main_parts: Vec<Filter> = base_filter.clone().into_iter().collect();
        main_parts.extend(facet_filters.iter().map(|(_, f)| f.clone()));
        let filter = combine(main_parts);

        let facet_plans = self.plan_facets(schema, &base_filter, &facet_filters);

        let sort = request
            .sort
            .iter()
            .map(|item| {
                resolve_column(&item.column, schema).map(|c| (c.clone(), item.direction))
            })
            .collect::<StrataResult<Vec<_>>>()?;

        Ok(Compiled::Plan(Box::new(CompiledQuery {
            table,
            schema: schema.to_vec(),
            select_columns,
            filter,
            base_filter,
            sort,
            offset: request.offset.or(parsed.offset).unwrap_or(0),
            limit: request.limit.or(parsed.limit),
            sql_offset: parsed.offset,
            sql_limit: parsed.limit,
            max_rows_per_page: self.max_rows_per_page(schema),
            facet_plans,
            include_row_etag: request.include_row_etag,
            request: request.clone(),
        })))
    }

    /// Derives the page-size bound from the schema's maximum row size.
    #[must_use]
    pub fn max_rows_per_page(&self, schema: &[ColumnModel]) -> u64 {
        let row_bytes: usize = schema.iter().map(max_bytes_as_text).sum();
        let by_bytes = if row_bytes == 0 {
            self.config.max_rows_per_page
        } else {
            self.config.max_bytes_per_request / row_bytes
        };
        (by_bytes.min(self.config.max_rows_per_page).max(1)) as u64
    }

    fn resolve_projection(
        &self,
        parsed: &ParsedQuery,
        schema: &[ColumnModel],
    ) -> StrataResult<Vec<ColumnModel>> {
        match &parsed.projection {
            Projection::All => Ok(schema.to_vec()),
            Projection::Columns(names) => names
                .iter()
                .map(|name| resolve_column(name, schema).cloned())
                .collect(),
        }
    }

    /// Rewrites visibility: `AND benefactor IN (accessible ∪ {-1})`.
    ///
    /// The sentinel keeps the IN list syntactically valid (and matching
    /// nothing real) even when the principal can access no benefactor.
    fn benefactor_filter(
        &self,
        principal: &str,
        benefactors: &[BenefactorDependency],
        schema: &[ColumnModel],
        index: &TableIndex,
    ) -> StrataResult<Option<Filter>> {
        let mut parts = Vec::new();
        for dependency in benefactors {
            let column = schema
                .iter()
                .find(|c| c.id == dependency.column_id)
                .ok_or_else(|| {
                    StrataError::not_found(format!(
                        "benefactor column {} in table schema",
                        dependency.column_id
                    ))
                })?;
            let candidates = distinct_benefactors(index, dependency.column_id);
            let mut accessible =
                self.access
                    .accessible_benefactors(principal, &dependency.benefactor_type, &candidates);
            accessible.insert(BENEFACTOR_SENTINEL);
            parts.push(Filter::In {
                column: column.clone(),
                values: accessible.iter().map(i64::to_string).collect(),
                negated: false,
            });
        }
        Ok(combine(parts))
    }

    /// Validates facet selections and resolves them to filters.
    fn resolve_facet_selections(
        &self,
        request: &QueryRequest,
        schema: &[ColumnModel],
    ) -> StrataResult<Vec<(ColumnModel, Filter)>> {
        let mut resolved = Vec::new();
        for selection in &request.selected_facets {
            let column = resolve_column(selection.column(), schema)?;
            if column.facet_type.is_none() {
                let faceted: Vec<&str> = schema
                    .iter()
                    .filter(|c| c.facet_type.is_some())
                    .map(|c| c.name.as_str())
                    .collect();
                return Err(StrataError::invalid_argument(format!(
                    "column '{}' is not faceted; faceted columns are: [{}]",
                    column.name,
                    faceted.join(", ")
                )));
            }
            let filter = match (selection, column.facet_type) {
                (FacetSelection::Values { values, .. }, Some(FacetType::Enumeration)) => {
                    facet_values_filter(column, values)
                }
                (FacetSelection::Range { min, max, .. }, Some(FacetType::Range)) => {
                    let mut bounds = Vec::new();
                    if let Some(min) = min {
                        bounds.push(Filter::Compare {
                            column: column.clone(),
                            op: CompareOp::Ge,
                            value: Some(min.clone()),
                        });
                    }
                    if let Some(max) = max {
                        bounds.push(Filter::Compare {
                            column: column.clone(),
                            op: CompareOp::Le,
                            value: Some(max.clone()),
                        });
                    }
                    match combine(bounds) {
                        Some(filter) => filter,
                        None => continue,
                    }
                }
                _ => {
                    return Err(StrataError::invalid_argument(format!(
                        "facet selection kind does not match column '{}' facet type",
                        column.name
                    )))
                }
            };
            resolved.push((column.clone(), filter));
        }
        Ok(resolved)
    }

    /// Plans stats for every faceted column. Unfiltered faceted columns
    /// are included too - the caller asked for facet stats, not only for
    /// the facets it filtered by.
    fn plan_facets(
        &self,
        schema: &[ColumnModel],
        base_filter: &Option<Filter>,
        facet_filters: &[(ColumnModel, Filter)],
    ) -> Vec<FacetPlan> {
        schema
            .iter()
            .filter_map(|column| {
                let facet_type = column.facet_type?;
                let mut parts: Vec<Filter> = base_filter.clone().into_iter().collect();
                parts.extend(
                    facet_filters
                        .iter()
                        .filter(|(c, _)| c.id != column.id)
                        .map(|(_, f)| f.clone()),
                );
                Some(FacetPlan {
                    column: column.clone(),
                    facet_type,
                    filter: combine(parts),
                })
            })
            .collect()
    }
}

/// Builds the filter for an enumeration facet selection; the null
/// sentinel keyword selects rows whose cell is null.
fn facet_values_filter(column: &ColumnModel, values: &[String]) -> Filter {
    let (null_selected, real): (Vec<&String>, Vec<&String>) =
        values.iter().partition(|v| v.as_str() == NULL_VALUE_KEYWORD);
    let mut parts = Vec::new();
    if !real.is_empty() {
        parts.push(Filter::In {
            column: column.clone(),
            values: real.into_iter().cloned().collect(),
            negated: false,
        });
    }
    if !null_selected.is_empty() {
        parts.push(Filter::IsNull {
            column: column.clone(),
            negated: false,
        });
    }
    if parts.is_empty() {
        // An empty selection matches nothing; an empty IN list keeps that
        // explicit.
        Filter::In {
            column: column.clone(),
            values: Vec::new(),
            negated: false,
        }
    } else if parts.len() == 1 {
        parts.remove(0)
    } else {
        Filter::Or(parts)
    }
}

fn combine(mut parts: Vec<Filter>) -> Option<Filter> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Filter::And(parts)),
    }
}

fn resolve_column<'a>(name: &str, schema: &'a [ColumnModel]) -> StrataResult<&'a ColumnModel> {
    schema
        .iter()
        .find(|c| c.name == name || c.id.to_string() == name)
        .ok_or_else(|| StrataError::not_found(format!("column '{name}'")))
}

fn resolve_predicate(predicate: &Predicate, schema: &[ColumnModel]) -> StrataResult<Filter> {
    Ok(match predicate {
        Predicate::Compare { column, op, value } => Filter::Compare {
            column: resolve_column(column, schema)?.clone(),
            op: *op,
            value: value.clone(),
        },
        Predicate::In {
            column,
            values,
            negated,
        } => Filter::In {
            column: resolve_column(column, schema)?.clone(),
            values: values.clone(),
            negated: *negated,
        },
        Predicate::Between {
            column,
            low,
            high,
            negated,
        } => Filter::Between {
            column: resolve_column(column, schema)?.clone(),
            low: low.clone(),
            high: high.clone(),
            negated: *negated,
        },
        Predicate::IsNull { column, negated } => Filter::IsNull {
            column: resolve_column(column, schema)?.clone(),
            negated: *negated,
        },
        Predicate::Like {
            column,
            pattern,
            negated,
        } => Filter::Like {
            column: resolve_column(column, schema)?.clone(),
            pattern: pattern.clone(),
            negated: *negated,
        },
        Predicate::And(parts) => Filter::And(
            parts
                .iter()
                .map(|p| resolve_predicate(p, schema))
                .collect::<StrataResult<_>>()?,
        ),
        Predicate::Or(parts) => Filter::Or(
            parts
                .iter()
                .map(|p| resolve_predicate(p, schema))
                .collect::<StrataResult<_>>()?,
        ),
        Predicate::Not(inner) => Filter::Not(Box::new(resolve_predicate(inner, schema)?)),
    })
}

/// Distinct parseable benefactor ids present in the index for a column.
fn distinct_benefactors(index: &TableIndex, column_id: ColumnId) -> BTreeSet<i64> {
    let mut distinct = BTreeSet::new();
    index.connection().read(index.physical_name(), |table| {
        if let Some(table) = table {
            for row in table.rows.values() {
                if let Some(Some(value)) = row.cells.get(&column_id) {
                    if let Ok(id) = value.parse::<i64>() {
                        distinct.insert(id);
                    }
                }
            }
        }
    });
    distinct
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_common::types::{RowId, RowVersion, TableId};
    use strata_index::ShardConnection;
    use strata_schema::ColumnType;
    use strata_truth::{Row, RowSet};

    struct AllowList(BTreeSet<i64>);
    impl AccessChecker for AllowList {
        fn accessible_benefactors(
            &self,
            _principal: &str,
            _benefactor_type: &str,
            candidates: &BTreeSet<i64>,
        ) -> BTreeSet<i64> {
            candidates.intersection(&self.0).copied().collect()
        }
    }

    fn schema() -> Vec<ColumnModel> {
        vec![
            ColumnModel::new("name", ColumnType::Text).with_facet(FacetType::Enumeration),
            ColumnModel::new("size", ColumnType::Integer).with_facet(FacetType::Range),
            ColumnModel::new("owner", ColumnType::Text),
            ColumnModel::new("benefactor", ColumnType::Integer),
        ]
    }

    fn index_with_rows(schema: &[ColumnModel], cell_rows: Vec<Vec<Option<String>>>) -> TableIndex {
        let index = TableIndex::new(
            Arc::new(ShardConnection::new()),
            TableIdAndVersion::live(TableId::new(1)),
        );
        index.set_schema(schema);
        if !cell_rows.is_empty() {
            let mut set = RowSet::new(
                TableId::new(1),
                schema.iter().map(|c| c.id).collect(),
                cell_rows.into_iter().map(Row::insert).collect(),
            );
            for (i, row) in set.rows.iter_mut().enumerate() {
                row.row_id = Some(RowId::new(i as u64));
                row.version = Some(RowVersion::new(0));
            }
            index
                .apply_change_set(&set, schema, RowVersion::new(0))
                .unwrap();
        }
        index
    }

    fn compiler(allowed: &[i64]) -> QueryCompiler {
        QueryCompiler::new(
            QueryConfig::default(),
            Arc::new(AllowList(allowed.iter().copied().collect())),
        )
    }

    fn plan(compiled: Compiled) -> CompiledQuery {
        match compiled {
            Compiled::Plan(plan) => *plan,
            Compiled::Empty { .. } => panic!("expected a plan"),
        }
    }

    #[test]
    fn test_empty_schema_compiles_to_empty_branch() {
        let index = index_with_rows(&[], vec![]);
        let compiled = compiler(&[])
            .compile(
                "user",
                &QueryRequest::sql("SELECT * FROM t1"),
                &[],
                &[],
                &index,
            )
            .unwrap();
        assert!(matches!(compiled, Compiled::Empty { .. }));
    }

    #[test]
    fn test_select_star_resolves_full_schema() {
        let schema = schema();
        let index = index_with_rows(&schema, vec![]);
        let compiled = plan(
            compiler(&[])
                .compile(
                    "user",
                    &QueryRequest::sql("SELECT * FROM t1"),
                    &schema,
                    &[],
                    &index,
                )
                .unwrap(),
        );
        assert_eq!(compiled.select_columns.len(), 4);
        assert!(compiled.filter.is_none());
    }

    #[test]
    fn test_unknown_column_is_not_found() {
        let schema = schema();
        let index = index_with_rows(&schema, vec![]);
        let err = compiler(&[])
            .compile(
                "user",
                &QueryRequest::sql("SELECT missing FROM t1"),
                &schema,
                &[],
                &index,
            )
            .unwrap_err();
        assert!(matches!(err, StrataError::NotFound { .. }));
    }

    #[test]
    fn test_benefactor_filter_includes_sentinel() {
        let schema = schema();
        let benefactor = schema[3].clone();
        let index = index_with_rows(
            &schema,
            vec![
                vec![
                    Some("a".to_string()),
                    Some("1".to_string()),
                    None,
                    Some("100".to_string()),
                ],
                vec![
                    Some("b".to_string()),
                    Some("2".to_string()),
                    None,
                    Some("200".to_string()),
                ],
            ],
        );
        let compiled = plan(
            compiler(&[100])
                .compile(
                    "user",
                    &QueryRequest::sql("SELECT * FROM t1"),
                    &schema,
                    &[BenefactorDependency {
                        column_id: benefactor.id,
                        benefactor_type: "entity".to_string(),
                    }],
                    &index,
                )
                .unwrap(),
        );
        match compiled.filter.unwrap() {
            Filter::In {
                column,
                values,
                negated: false,
            } => {
                assert_eq!(column.id, benefactor.id);
                assert_eq!(values, vec!["-1".to_string(), "100".to_string()]);
            }
            other => panic!("expected IN filter, got {other:?}"),
        }
    }

    #[test]
    fn test_benefactor_filter_with_no_access_is_sentinel_only() {
        let schema = schema();
        let benefactor = schema[3].clone();
        let index = index_with_rows(
            &schema,
            vec![vec![
                Some("a".to_string()),
                Some("1".to_string()),
                None,
                Some("100".to_string()),
            ]],
        );
        let compiled = plan(
            compiler(&[])
                .compile(
                    "user",
                    &QueryRequest::sql("SELECT * FROM t1"),
                    &schema,
                    &[BenefactorDependency {
                        column_id: benefactor.id,
                        benefactor_type: "entity".to_string(),
                    }],
                    &index,
                )
                .unwrap(),
        );
        match compiled.filter.unwrap() {
            Filter::In { values, .. } => assert_eq!(values, vec!["-1".to_string()]),
            other => panic!("expected IN filter, got {other:?}"),
        }
    }

    #[test]
    fn test_facet_on_unfaceted_column_lists_valid_ones() {
        let schema = schema();
        let index = index_with_rows(&schema, vec![]);
        let mut request = QueryRequest::sql("SELECT * FROM t1");
        request.selected_facets.push(FacetSelection::Values {
            column: "owner".to_string(),
            values: vec!["me".to_string()],
        });
        let err = compiler(&[])
            .compile("user", &request, &schema, &[], &index)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'owner' is not faceted"), "{message}");
        assert!(message.contains("name"), "{message}");
        assert!(message.contains("size"), "{message}");
    }

    #[test]
    fn test_facet_plans_exclude_own_filter() {
        let schema = schema();
        let index = index_with_rows(&schema, vec![]);
        let mut request = QueryRequest::sql("SELECT * FROM t1");
        request.selected_facets.push(FacetSelection::Values {
            column: "name".to_string(),
            values: vec!["a".to_string()],
        });
        request.selected_facets.push(FacetSelection::Range {
            column: "size".to_string(),
            min: Some("1".to_string()),
            max: None,
        });
        let compiled = plan(
            compiler(&[])
                .compile("user", &request, &schema, &[], &index)
                .unwrap(),
        );
        // The main filter carries both facet selections.
        assert!(matches!(compiled.filter, Some(Filter::And(_))));

        // Each plan carries only the other facet's filter.
        let name_plan = compiled
            .facet_plans
            .iter()
            .find(|p| p.column.name == "name")
            .unwrap();
        match name_plan.filter.as_ref().unwrap() {
            Filter::Compare { column, .. } => assert_eq!(column.name, "size"),
            other => panic!("expected size filter, got {other:?}"),
        }
        let size_plan = compiled
            .facet_plans
            .iter()
            .find(|p| p.column.name == "size")
            .unwrap();
        match size_plan.filter.as_ref().unwrap() {
            Filter::In { column, .. } => assert_eq!(column.name, "name"),
            other => panic!("expected name filter, got {other:?}"),
        }
    }

    #[test]
    fn test_null_keyword_in_facet_values() {
        let schema = schema();
        let column = schema[0].clone();
        let filter = facet_values_filter(
            &column,
            &["a".to_string(), NULL_VALUE_KEYWORD.to_string()],
        );
        match filter {
            Filter::Or(parts) => {
                assert!(matches!(&parts[0], Filter::In { .. }));
                assert!(matches!(&parts[1], Filter::IsNull { negated: false, .. }));
            }
            other => panic!("expected OR, got {other:?}"),
        }
    }

    #[test]
    fn test_pagination_override_precedence() {
        let schema = schema();
        let index = index_with_rows(&schema, vec![]);
        let mut request = QueryRequest::sql("SELECT * FROM t1 LIMIT 50 OFFSET 5");
        request.limit = Some(10);
        let compiled = plan(
            compiler(&[])
                .compile("user", &request, &schema, &[], &index)
                .unwrap(),
        );
        // Request limit overrides the SQL's; SQL pagination is retained
        // separately for count post-processing.
        assert_eq!(compiled.limit, Some(10));
        assert_eq!(compiled.offset, 5);
        assert_eq!(compiled.sql_limit, Some(50));
        assert_eq!(compiled.sql_offset, Some(5));
    }

    #[test]
    fn test_additional_filters_are_anded() {
        let schema = schema();
        let index = index_with_rows(&schema, vec![]);
        let mut request = QueryRequest::sql("SELECT * FROM t1 WHERE size > 1");
        request.additional_filters.push("owner = 'me'".to_string());
        let compiled = plan(
            compiler(&[])
                .compile("user", &request, &schema, &[], &index)
                .unwrap(),
        );
        match compiled.filter.unwrap() {
            Filter::And(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected AND, got {other:?}"),
        }
    }
}
