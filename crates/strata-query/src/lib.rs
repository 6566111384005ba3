//! Query compilation and execution for Strata tables.
//!
//! A query request moves through three stages:
//!
//! 1. [`parser`]: the SQL string is parsed (single table only, joins are
//!    rejected) into a restricted internal model.
//! 2. [`compile`]: columns are resolved against the schema, row-level
//!    benefactor filters and selected facet filters are injected, and the
//!    main, count, facet, and sum-of-file-sizes plans are derived. An
//!    empty schema compiles to an explicit empty branch rather than an
//!    error.
//! 3. [`exec`]: the plan runs against the table's index under the table
//!    read lease, after the status check, streaming rows to the caller's
//!    handler and optionally serving/saving the hash-keyed result cache.

pub mod compile;
pub mod exec;
pub mod model;
pub mod parser;

pub use compile::{
    AccessChecker, BenefactorDependency, Compiled, CompiledQuery, FacetPlan, QueryCompiler,
};
pub use exec::{FileSizeResolver, QueryEventListener, QueryExecutor, RowHandler};
pub use model::{
    FacetResult, FacetSelection, NextPageToken, QueryOptions, QueryRequest, QueryResultBundle,
    QueryRow, SortDirection, SortItem, SumFileSizes,
};
