//! A small bounded cache with least-recently-used eviction.

use std::collections::HashMap;
use std::hash::Hash;

use crate::stats::CacheStats;

/// One cached entry plus its recency stamp.
struct Entry<V> {
    value: V,
    last_used: u64,
}

/// A bounded map that evicts the least recently used entry on overflow.
///
/// Recency is tracked with a monotonic tick rather than a linked list;
/// eviction scans for the minimum stamp. The caches built on top of this
/// hold hundreds of entries, not millions, so the scan is cheaper than the
/// bookkeeping it replaces.
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, Entry<V>>,
    tick: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            tick: 0,
            stats: CacheStats::new(),
        }
    }

    /// Returns the current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Gets the value for a key, marking it recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        match self.map.get_mut(key) {
            Some(entry) => {
                entry.last_used = tick;
                self.stats.record_hit();
                Some(&entry.value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Gets a mutable reference to the value for a key, marking it
    /// recently used.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.tick += 1;
        let tick = self.tick;
        match self.map.get_mut(key) {
            Some(entry) => {
                entry.last_used = tick;
                self.stats.record_hit();
                Some(&mut entry.value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Inserts a value, evicting the least recently used entry when full.
    /// Returns the previous value for the key, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.tick += 1;
        self.stats.record_insert();
        let previous = self
            .map
            .insert(
                key,
                Entry {
                    value,
                    last_used: self.tick,
                },
            )
            .map(|e| e.value);
        if previous.is_none() && self.map.len() > self.capacity {
            self.evict_one();
        }
        previous
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|e| e.value)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Returns every key currently cached.
    pub fn keys(&self) -> Vec<K> {
        self.map.keys().cloned().collect()
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn evict_one(&mut self) {
        if let Some(oldest) = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        {
            self.map.remove(&oldest);
            self.stats.record_eviction();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = LruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"missing"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" is the eviction candidate.
        cache.get(&"a");
        cache.insert("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"c"), Some(&3));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_reinsert_replaces_without_eviction() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("a", 10), Some(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(&10));
    }
}
