//! Shared caches for the Strata table engine.
//!
//! Two capabilities live here, both injected explicitly into their users
//! rather than read from ambient state:
//!
//! - [`RowVersionCache`]: a write-through map of each row's latest version,
//!   letting the truth store answer "latest versions" reads without
//!   re-scanning the change log.
//! - [`QueryCache`]: a TTL'd, hash-keyed cache of query results.
//!
//! Each capability carries its own `enabled` flag as part of its interface;
//! a disabled cache answers nothing and accepts nothing, and callers fall
//! back to the authoritative path.

mod lru;
mod query_cache;
mod row_versions;
mod stats;

pub use lru::LruCache;
pub use query_cache::{QueryCache, QueryCacheConfig, QueryCacheKey};
pub use row_versions::RowVersionCache;
pub use stats::CacheStats;
