//! TTL'd cache of executed query results.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use strata_common::types::TableId;

use crate::lru::LruCache;
use crate::stats::CacheStats;

/// Cache key: a deterministic hash of the fully-rewritten query request.
///
/// The hash is taken after row-level filters and facet rewrites are
/// applied, so two principals with different visibility never share an
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryCacheKey(u64);

impl QueryCacheKey {
    /// Hashes any rewritten request representation into a key.
    #[must_use]
    pub fn from_request(request: &impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        request.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Returns the raw hash value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Configuration for the query result cache.
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Whether the capability is live. A disabled cache stores and returns
    /// nothing, and callers execute live.
    pub enabled: bool,
    /// Maximum number of cached results.
    pub max_entries: usize,
    /// Time-to-live for a stored result.
    pub ttl: Duration,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 500,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

struct CachedEntry<R> {
    result: Arc<R>,
    table_id: TableId,
    stored_at: Instant,
}

/// A hash-keyed query result cache with TTL expiry.
///
/// Expired entries are dropped lazily on access; a background refresher
/// can also drain [`QueryCache::take_expired_keys`] and re-execute those
/// queries without waiting for the next caller.
pub struct QueryCache<R> {
    config: QueryCacheConfig,
    entries: RwLock<LruCache<QueryCacheKey, CachedEntry<R>>>,
}

impl<R> QueryCache<R> {
    /// Creates a cache with the given configuration.
    #[must_use]
    pub fn new(config: QueryCacheConfig) -> Self {
        let capacity = config.max_entries;
        Self {
            config,
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Whether the capability is live.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns a fresh (non-expired) cached result.
    pub fn get(&self, key: QueryCacheKey) -> Option<Arc<R>> {
        if !self.config.enabled {
            return None;
        }
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() <= self.config.ttl => {
                Some(Arc::clone(&entry.result))
            }
            Some(_) => {
                entries.remove(&key);
                debug!(key = key.as_u64(), "dropped expired query result");
                None
            }
            None => None,
        }
    }

    /// Stores a result for a key, tagged with the table it came from.
    pub fn put(&self, key: QueryCacheKey, table_id: TableId, result: R) {
        if !self.config.enabled {
            return;
        }
        self.entries.write().insert(
            key,
            CachedEntry {
                result: Arc::new(result),
                table_id,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops every result cached for the given table.
    pub fn invalidate_table(&self, table_id: TableId) {
        let mut entries = self.entries.write();
        for key in entries.keys() {
            let stale = entries
                .get(&key)
                .map(|e| e.table_id == table_id)
                .unwrap_or(false);
            if stale {
                entries.remove(&key);
            }
        }
    }

    /// Removes and returns the keys of expired entries, so a background
    /// refresher can re-execute and re-store them.
    pub fn take_expired_keys(&self) -> Vec<QueryCacheKey> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut entries = self.entries.write();
        let mut expired = Vec::new();
        for key in entries.keys() {
            let lapsed = entries
                .get(&key)
                .map(|e| e.stored_at.elapsed() > self.config.ttl)
                .unwrap_or(false);
            if lapsed {
                entries.remove(&key);
                expired.push(key);
            }
        }
        expired
    }

    /// Returns the number of cached results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of hit/miss counters.
    pub fn with_stats<T>(&self, f: impl FnOnce(&CacheStats) -> T) -> T {
        f(self.entries.read().stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sql: &str) -> QueryCacheKey {
        QueryCacheKey::from_request(&sql)
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(key("SELECT * FROM t1"), key("SELECT * FROM t1"));
        assert_ne!(key("SELECT * FROM t1"), key("SELECT * FROM t2"));
    }

    #[test]
    fn test_put_and_get() {
        let cache: QueryCache<Vec<i64>> = QueryCache::new(QueryCacheConfig::default());
        let k = key("SELECT a FROM t1");
        cache.put(k, TableId::new(1), vec![1, 2, 3]);
        assert_eq!(*cache.get(k).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache: QueryCache<String> = QueryCache::new(QueryCacheConfig {
            enabled: false,
            ..Default::default()
        });
        let k = key("SELECT a FROM t1");
        cache.put(k, TableId::new(1), "rows".to_string());
        assert!(cache.get(k).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache: QueryCache<String> = QueryCache::new(QueryCacheConfig {
            ttl: Duration::from_secs(0),
            ..Default::default()
        });
        let k = key("SELECT a FROM t1");
        cache.put(k, TableId::new(1), "rows".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(k).is_none());
    }

    #[test]
    fn test_take_expired_keys() {
        let cache: QueryCache<String> = QueryCache::new(QueryCacheConfig {
            ttl: Duration::from_secs(0),
            ..Default::default()
        });
        let k = key("SELECT a FROM t1");
        cache.put(k, TableId::new(1), "rows".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.take_expired_keys(), vec![k]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_table() {
        let cache: QueryCache<String> = QueryCache::new(QueryCacheConfig::default());
        let k1 = key("SELECT a FROM t1");
        let k2 = key("SELECT a FROM t2");
        cache.put(k1, TableId::new(1), "one".to_string());
        cache.put(k2, TableId::new(2), "two".to_string());
        cache.invalidate_table(TableId::new(1));
        assert!(cache.get(k1).is_none());
        assert!(cache.get(k2).is_some());
    }
}
