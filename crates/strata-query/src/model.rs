//! Query request and response surface.

use serde::{Deserialize, Serialize};

use strata_common::types::{RowId, RowVersion};
use strata_common::{StrataError, StrataResult};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending, nulls last.
    Asc,
    /// Descending, nulls last.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortItem {
    /// Column name as written by the caller.
    pub column: String,
    /// Direction; ascending when omitted.
    pub direction: SortDirection,
}

/// A caller-selected facet filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetSelection {
    /// Keep rows whose column value is one of `values`.
    Values {
        /// Faceted column name.
        column: String,
        /// Accepted values.
        values: Vec<String>,
    },
    /// Keep rows whose numeric value lies within the closed range.
    Range {
        /// Faceted column name.
        column: String,
        /// Lower bound, when bounded below.
        min: Option<String>,
        /// Upper bound, when bounded above.
        max: Option<String>,
    },
}

impl FacetSelection {
    /// The column this selection filters.
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            FacetSelection::Values { column, .. } | FacetSelection::Range { column, .. } => column,
        }
    }
}

/// A query request: SQL plus pagination, sorting, and facet selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The SQL text. Must reference exactly one table.
    pub sql: String,
    /// Sort keys applied after the WHERE clause.
    pub sort: Vec<SortItem>,
    /// Rows to skip.
    pub offset: Option<u64>,
    /// Maximum rows to return.
    pub limit: Option<u64>,
    /// Selected facet filters.
    pub selected_facets: Vec<FacetSelection>,
    /// Include each row's etag in results.
    pub include_row_etag: bool,
    /// Extra WHERE-clause condition snippets ANDed onto the query.
    pub additional_filters: Vec<String>,
}

impl QueryRequest {
    /// A request carrying only SQL, with defaults elsewhere.
    #[must_use]
    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            sort: Vec::new(),
            offset: None,
            limit: None,
            selected_facets: Vec::new(),
            include_row_etag: false,
            additional_filters: Vec::new(),
        }
    }
}

/// Options mask: callers pay only for the parts they request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Run the main query and return rows.
    pub run_query: bool,
    /// Run the derived count query.
    pub run_count: bool,
    /// Compute facet statistics.
    pub return_facets: bool,
    /// Sum the file sizes of matched rows.
    pub run_sum_file_sizes: bool,
    /// Return the resolved select columns.
    pub return_select_columns: bool,
    /// Return the table's column models.
    pub return_column_models: bool,
    /// Return the derived maximum rows per page.
    pub return_max_rows_per_page: bool,
    /// Return the status row's last-changed-on timestamp.
    pub return_last_updated_on: bool,
}

impl QueryOptions {
    /// Nothing requested.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            run_query: false,
            run_count: false,
            return_facets: false,
            run_sum_file_sizes: false,
            return_select_columns: false,
            return_column_models: false,
            return_max_rows_per_page: false,
            return_last_updated_on: false,
        }
    }

    /// Only the main query.
    #[must_use]
    pub const fn rows_only() -> Self {
        Self {
            run_query: true,
            ..Self::none()
        }
    }

    /// Requests the main query.
    #[must_use]
    pub const fn with_query(mut self) -> Self {
        self.run_query = true;
        self
    }

    /// Requests the count.
    #[must_use]
    pub const fn with_count(mut self) -> Self {
        self.run_count = true;
        self
    }

    /// Requests facet statistics.
    #[must_use]
    pub const fn with_facets(mut self) -> Self {
        self.return_facets = true;
        self
    }

    /// Requests the sum of file sizes.
    #[must_use]
    pub const fn with_sum_file_sizes(mut self) -> Self {
        self.run_sum_file_sizes = true;
        self
    }

    /// Requests the resolved select columns.
    #[must_use]
    pub const fn with_select_columns(mut self) -> Self {
        self.return_select_columns = true;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::rows_only()
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRow {
    /// Row id.
    pub row_id: RowId,
    /// The version the row was last written at.
    pub version: RowVersion,
    /// Row etag, when requested.
    pub etag: Option<String>,
    /// Values aligned with the query's select columns.
    pub values: Vec<Option<String>>,
}

/// Facet statistics for one faceted column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FacetResult {
    /// Distinct value counts, capped at the category limit.
    ValueCounts {
        /// Faceted column name.
        column: String,
        /// `(rendered value, count)` pairs, most frequent first. Null
        /// cells render as the null sentinel keyword.
        values: Vec<(String, u64)>,
    },
    /// Numeric range summary.
    Range {
        /// Faceted column name.
        column: String,
        /// Minimum value among matched rows.
        min: Option<String>,
        /// Maximum value among matched rows.
        max: Option<String>,
    },
}

/// Sum of file sizes over the matched rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumFileSizes {
    /// Total bytes across matched file references.
    pub sum_bytes: u64,
    /// True when the match set exceeded the sampling cap, making
    /// `sum_bytes` a lower bound.
    pub greater_than: bool,
}

/// The assembled response; unrequested parts stay `None`.
#[derive(Debug, Clone, Default)]
pub struct QueryResultBundle {
    /// Result rows, when `run_query` was set.
    pub rows: Option<Vec<QueryRow>>,
    /// Names of the resolved select columns.
    pub select_columns: Option<Vec<String>>,
    /// The table's column models.
    pub column_models: Option<Vec<strata_schema::ColumnModel>>,
    /// Row count, when `run_count` was set.
    pub count: Option<u64>,
    /// Facet statistics, when requested.
    pub facets: Option<Vec<FacetResult>>,
    /// Sum of file sizes, when requested.
    pub sum_file_sizes: Option<SumFileSizes>,
    /// Derived page-size bound.
    pub max_rows_per_page: Option<u64>,
    /// When the table last changed.
    pub last_updated_on: Option<chrono::DateTime<chrono::Utc>>,
    /// Etag of the last change applied to the queried index.
    pub etag: Option<String>,
    /// Continuation token, present when the page filled up.
    pub next_page_token: Option<String>,
}

/// The continuation token for paging through a result.
///
/// An explicit, versioned struct containing exactly the fields needed to
/// re-issue the query - nothing reflection-driven - so tokens stay stable
/// across refactors. Serialized as JSON; the payload is opaque to
/// callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextPageToken {
    /// Token format version.
    pub v: u32,
    /// The original SQL.
    pub sql: String,
    /// The original sort keys.
    pub sort: Vec<SortItem>,
    /// Offset for the next page (original offset plus page size).
    pub offset: u64,
    /// The original limit.
    pub limit: Option<u64>,
    /// The original facet selection.
    pub selected_facets: Vec<FacetSelection>,
}

impl NextPageToken {
    /// Current token format version.
    pub const VERSION: u32 = 1;

    /// Encodes the token to its opaque string form.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("token serialization cannot fail")
    }

    /// Decodes a token. A malformed token is the caller's error, never a
    /// silent empty result.
    pub fn decode(token: &str) -> StrataResult<Self> {
        let parsed: Self = serde_json::from_str(token)
            .map_err(|e| StrataError::invalid_argument(format!("invalid page token: {e}")))?;
        if parsed.v != Self::VERSION {
            return Err(StrataError::invalid_argument(format!(
                "unsupported page token version {}",
                parsed.v
            )));
        }
        Ok(parsed)
    }

    /// Rebuilds the follow-up request this token stands for.
    #[must_use]
    pub fn to_request(&self) -> QueryRequest {
        QueryRequest {
            sql: self.sql.clone(),
            sort: self.sort.clone(),
            offset: Some(self.offset),
            limit: self.limit,
            selected_facets: self.selected_facets.clone(),
            include_row_etag: false,
            additional_filters: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_token_round_trip() {
        let token = NextPageToken {
            v: NextPageToken::VERSION,
            sql: "SELECT * FROM t1".to_string(),
            sort: vec![SortItem {
                column: "name".to_string(),
                direction: SortDirection::Desc,
            }],
            offset: 100,
            limit: Some(1000),
            selected_facets: vec![FacetSelection::Values {
                column: "state".to_string(),
                values: vec!["open".to_string()],
            }],
        };
        let decoded = NextPageToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded, token);
        let request = decoded.to_request();
        assert_eq!(request.offset, Some(100));
        assert_eq!(request.sql, "SELECT * FROM t1");
    }

    #[test]
    fn test_malformed_token_is_invalid_argument() {
        let err = NextPageToken::decode("not json at all").unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
    }

    #[test]
    fn test_unsupported_token_version() {
        let json = r#"{"v":99,"sql":"SELECT * FROM t1","sort":[],"offset":0,"limit":null,"selected_facets":[]}"#;
        let err = NextPageToken::decode(json).unwrap_err();
        assert!(err.to_string().contains("version 99"));
    }

    #[test]
    fn test_options_builders() {
        let options = QueryOptions::none().with_query().with_count();
        assert!(options.run_query);
        assert!(options.run_count);
        assert!(!options.return_facets);
    }
}
