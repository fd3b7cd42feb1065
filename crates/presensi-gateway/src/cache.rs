//! Query result cache with TTL expiry and FIFO eviction
//!
//! Entries expire lazily on read; when the cache exceeds capacity the
//! oldest-inserted entry is evicted (FIFO, not LRU - a hot entry is still
//! evicted once it is the oldest).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use presensi_common::config::CacheSettings;

use crate::metrics;

/// Cache hit/miss counters, updated atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self, entries: usize, max_entries: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            entries,
            max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// Insertion order for FIFO eviction; may hold stale keys for entries
    /// that were overwritten or expired, skipped during eviction
    order: VecDeque<String>,
}

/// TTL + FIFO query result cache
pub struct QueryCache {
    inner: Mutex<CacheInner>,
    stats: CacheStats,
    max_entries: usize,
    default_ttl: Duration,
}

impl QueryCache {
    pub fn new(settings: &CacheSettings) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            stats: CacheStats::default(),
            max_entries: settings.max_entries,
            default_ttl: Duration::from_secs(settings.default_ttl_secs),
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a cached value. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock();
        match inner.map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let value = entry.value.clone();
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit();
                Some(value)
            }
            Some(_) => {
                inner.map.remove(key);
                // The order entry must go too, or TTL churn grows it forever
                inner.order.retain(|k| k != key);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss();
                debug!(key, "Cache entry expired");
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss();
                None
            }
        }
    }

    /// Insert a value with an explicit TTL. Overwriting resets the entry's
    /// age for eviction purposes.
    pub fn set(&self, key: String, value: serde_json::Value, ttl: Duration) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key.clone());
        inner.map.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );

        while inner.map.len() > self.max_entries {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            // Stale order keys (overwritten entries) point at nothing
            if inner.map.remove(&oldest).is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_eviction();
                debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }
    }

    /// Drop all entries (admin endpoint)
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.map.len();
        inner.map.clear();
        inner.order.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.len(), self.max_entries)
    }

    #[cfg(test)]
    fn order_len(&self) -> usize {
        self.inner.lock().order.len()
    }
}

/// Cache key for a query: blake3 over the SQL and its bound parameters
pub fn cache_key(sql: &str, params: &[serde_json::Value]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(sql.as_bytes());
    for p in params {
        hasher.update(b"\x1f");
        hasher.update(p.to_string().as_bytes());
    }
    let hash = hasher.finalize();
    hash.to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(max_entries: usize, ttl_secs: u64) -> Arc<QueryCache> {
        QueryCache::new(&CacheSettings {
            max_entries,
            default_ttl_secs: ttl_secs,
        })
    }

    #[test]
    fn test_get_set() {
        let cache = cache(10, 60);
        assert!(cache.get("k1").is_none());
        cache.set("k1".into(), json!([1, 2, 3]), Duration::from_secs(60));
        assert_eq!(cache.get("k1"), Some(json!([1, 2, 3])));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = cache(10, 60);
        cache.set("k1".into(), json!("v"), Duration::from_millis(50));
        assert!(cache.get("k1").is_some());
        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = cache(3, 60);
        let ttl = Duration::from_secs(60);
        cache.set("a".into(), json!(1), ttl);
        cache.set("b".into(), json!(2), ttl);
        cache.set("c".into(), json!(3), ttl);
        cache.set("d".into(), json!(4), ttl);

        // "a" was inserted first, so it goes, even though nothing touched it
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_resets_insertion_age() {
        let cache = cache(3, 60);
        let ttl = Duration::from_secs(60);
        cache.set("a".into(), json!(1), ttl);
        cache.set("b".into(), json!(2), ttl);
        cache.set("c".into(), json!(3), ttl);
        // Rewriting "a" makes it the newest; "b" is now the oldest
        cache.set("a".into(), json!(10), ttl);
        cache.set("d".into(), json!(4), ttl);

        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(json!(10)));
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_ttl_churn_does_not_grow_order_deque() {
        let cache = cache(4, 60);
        for i in 0..100 {
            let key = format!("k{i}");
            cache.set(key.clone(), json!(i), Duration::from_millis(0));
            assert!(cache.get(&key).is_none());
        }
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.order_len(), 0);
    }

    #[test]
    fn test_clear() {
        let cache = cache(10, 60);
        cache.set("a".into(), json!(1), Duration::from_secs(60));
        cache.set("b".into(), json!(2), Duration::from_secs(60));
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_cache_key_sensitivity() {
        let k1 = cache_key("SELECT * FROM siswa WHERE id = ?", &[json!(1)]);
        let k2 = cache_key("SELECT * FROM siswa WHERE id = ?", &[json!(2)]);
        let k3 = cache_key("SELECT * FROM siswa WHERE id = ?", &[json!(1)]);
        assert_ne!(k1, k2);
        assert_eq!(k1, k3);
        assert_eq!(k1.len(), 16);
    }
}
