//! Query execution with timing statistics and result caching
//!
//! Every query goes through here: timing is recorded per query shape,
//! slow executions land in a bounded report, and read queries may be
//! served from the result cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use presensi_common::config::ExecutorSettings;
use presensi_common::error::PresensiError;

use crate::cache::{cache_key, QueryCache};
use crate::db::Database;
use crate::metrics;

// ═══════════════════════════════════════════════════════════════════════════
// TIMING STATISTICS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct QueryStat {
    /// A sample of the SQL this stat aggregates (first seen)
    pub query: String,
    pub count: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
    #[serde(skip)]
    last_seen: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowQueryEntry {
    pub query: String,
    pub elapsed_ms: u64,
    pub at_unix_ms: u64,
}

struct TrackerInner {
    /// Keyed by blake3 of the SQL text, capped at `max_tracked`
    queries: HashMap<String, QueryStat>,
    slow: VecDeque<SlowQueryEntry>,
}

/// Per-query timing aggregation plus the slow-query report.
///
/// Holds no database handle so it can be exercised directly in tests.
pub struct QueryStatsTracker {
    inner: Mutex<TrackerInner>,
    slow_threshold: Duration,
    max_tracked: usize,
    slow_log_size: usize,
}

impl QueryStatsTracker {
    pub fn new(settings: &ExecutorSettings) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                queries: HashMap::new(),
                slow: VecDeque::new(),
            }),
            slow_threshold: Duration::from_millis(settings.slow_query_threshold_ms),
            max_tracked: settings.max_tracked_queries,
            slow_log_size: settings.slow_query_log_size,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Record one execution of `sql`
    pub fn record(&self, sql: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let key = blake3::hash(sql.as_bytes()).to_hex()[..16].to_string();
        let now = Instant::now();

        let mut inner = self.inner.lock();
        match inner.queries.get_mut(&key) {
            Some(stat) => {
                stat.count += 1;
                stat.total_ms += elapsed_ms;
                stat.min_ms = stat.min_ms.min(elapsed_ms);
                stat.max_ms = stat.max_ms.max(elapsed_ms);
                stat.avg_ms = stat.total_ms as f64 / stat.count as f64;
                stat.last_seen = now;
            }
            None => {
                if inner.queries.len() >= self.max_tracked {
                    evict_stalest(&mut inner.queries);
                }
                inner.queries.insert(
                    key,
                    QueryStat {
                        query: sql.to_string(),
                        count: 1,
                        total_ms: elapsed_ms,
                        min_ms: elapsed_ms,
                        max_ms: elapsed_ms,
                        avg_ms: elapsed_ms as f64,
                        last_seen: now,
                    },
                );
            }
        }

        if elapsed >= self.slow_threshold {
            metrics::record_slow_query();
            warn!(elapsed_ms, query = sql, "Slow query");
            if inner.slow.len() >= self.slow_log_size {
                inner.slow.pop_front();
            }
            inner.slow.push_back(SlowQueryEntry {
                query: sql.to_string(),
                elapsed_ms,
                at_unix_ms: unix_ms(),
            });
        }
    }

    /// Tracked query stats, slowest average first
    pub fn query_stats(&self) -> Vec<QueryStat> {
        let inner = self.inner.lock();
        let mut stats: Vec<_> = inner.queries.values().cloned().collect();
        stats.sort_by(|a, b| b.avg_ms.partial_cmp(&a.avg_ms).unwrap_or(std::cmp::Ordering::Equal));
        stats
    }

    /// Slow-query report, most recent last
    pub fn slow_queries(&self) -> Vec<SlowQueryEntry> {
        self.inner.lock().slow.iter().cloned().collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.lock().queries.len()
    }
}

/// Drop the stat least recently updated to keep the map bounded
fn evict_stalest(queries: &mut HashMap<String, QueryStat>) {
    if let Some(stalest) = queries
        .iter()
        .min_by_key(|(_, s)| s.last_seen)
        .map(|(k, _)| k.clone())
    {
        queries.remove(&stalest);
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════
// EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════

/// Caching behavior for a single fetch
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub use_cache: bool,
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn bypass() -> Self {
        Self {
            use_cache: false,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

/// Executes queries against the pool, recording timing and consulting the
/// result cache for reads.
pub struct QueryExecutor {
    db: Database,
    cache: Arc<QueryCache>,
    tracker: QueryStatsTracker,
}

impl QueryExecutor {
    pub fn new(db: Database, cache: Arc<QueryCache>, settings: &ExecutorSettings) -> Self {
        Self {
            db,
            cache,
            tracker: QueryStatsTracker::new(settings),
        }
    }

    pub fn tracker(&self) -> &QueryStatsTracker {
        &self.tracker
    }

    /// Run a read query, serving from cache when the policy allows
    pub async fn fetch(
        &self,
        sql: &str,
        params: &[serde_json::Value],
        policy: CachePolicy,
    ) -> Result<FetchResult, PresensiError> {
        let key = cache_key(sql, params);
        if policy.use_cache {
            if let Some(cached) = self.cache.get(&key) {
                let (columns, rows) = decode_grid(cached)?;
                debug!(key = %key, "Query served from cache");
                return Ok(FetchResult {
                    columns,
                    rows,
                    from_cache: true,
                    elapsed_ms: 0,
                });
            }
        }

        let started = Instant::now();
        let (columns, rows) = self.db.fetch_all(sql, params).await?;
        let elapsed = started.elapsed();
        self.tracker.record(sql, elapsed);
        metrics::observe_query_duration(elapsed.as_secs_f64());

        if policy.use_cache {
            let ttl = policy.ttl.unwrap_or_else(|| self.cache.default_ttl());
            self.cache.set(key, encode_grid(&columns, &rows), ttl);
        }

        Ok(FetchResult {
            columns,
            rows,
            from_cache: false,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    /// Run a write statement; never cached
    pub async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<u64, PresensiError> {
        let started = Instant::now();
        let affected = self.db.execute(sql, params).await?;
        let elapsed = started.elapsed();
        self.tracker.record(sql, elapsed);
        metrics::observe_query_duration(elapsed.as_secs_f64());
        Ok(affected)
    }
}

fn encode_grid(columns: &[String], rows: &[Vec<String>]) -> serde_json::Value {
    serde_json::json!({ "columns": columns, "rows": rows })
}

fn decode_grid(value: serde_json::Value) -> Result<(Vec<String>, Vec<Vec<String>>), PresensiError> {
    #[derive(serde::Deserialize)]
    struct Grid {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    }
    let grid: Grid = serde_json::from_value(value)?;
    Ok((grid.columns, grid.rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(threshold_ms: u64, max_tracked: usize, slow_log: usize) -> QueryStatsTracker {
        QueryStatsTracker::new(&ExecutorSettings {
            slow_query_threshold_ms: threshold_ms,
            max_tracked_queries: max_tracked,
            slow_query_log_size: slow_log,
        })
    }

    #[test]
    fn test_stat_aggregation() {
        let t = tracker(1000, 100, 10);
        t.record("SELECT * FROM siswa", Duration::from_millis(10));
        t.record("SELECT * FROM siswa", Duration::from_millis(30));
        t.record("SELECT * FROM guru", Duration::from_millis(5));

        let stats = t.query_stats();
        assert_eq!(stats.len(), 2);
        let siswa = stats.iter().find(|s| s.query.contains("siswa")).unwrap();
        assert_eq!(siswa.count, 2);
        assert_eq!(siswa.min_ms, 10);
        assert_eq!(siswa.max_ms, 30);
        assert!((siswa.avg_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_sorted_slowest_first() {
        let t = tracker(1000, 100, 10);
        t.record("fast", Duration::from_millis(1));
        t.record("slow", Duration::from_millis(500));
        let stats = t.query_stats();
        assert_eq!(stats[0].query, "slow");
    }

    #[test]
    fn test_slow_query_report_is_bounded() {
        let t = tracker(10, 100, 3);
        for i in 0..5 {
            t.record(&format!("q{i}"), Duration::from_millis(50));
        }
        let slow = t.slow_queries();
        assert_eq!(slow.len(), 3);
        // Oldest entries were dropped
        assert_eq!(slow[0].query, "q2");
        assert_eq!(slow[2].query, "q4");
    }

    #[test]
    fn test_fast_queries_not_in_slow_report() {
        let t = tracker(100, 100, 10);
        t.record("fast", Duration::from_millis(5));
        assert!(t.slow_queries().is_empty());
    }

    #[test]
    fn test_tracked_map_is_capped() {
        let t = tracker(1000, 3, 10);
        for i in 0..5 {
            t.record(&format!("q{i}"), Duration::from_millis(1));
            // Distinct last_seen values so eviction order is deterministic
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(t.tracked_count(), 3);
        let stats = t.query_stats();
        // q0 and q1 were the stalest entries and got evicted
        assert!(!stats.iter().any(|s| s.query == "q0"));
        assert!(!stats.iter().any(|s| s.query == "q1"));
        assert!(stats.iter().any(|s| s.query == "q4"));
    }

    #[test]
    fn test_recording_refreshes_staleness() {
        let t = tracker(1000, 2, 10);
        t.record("a", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(2));
        t.record("b", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(2));
        // Touch "a" so "b" becomes the stalest
        t.record("a", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(2));
        t.record("c", Duration::from_millis(1));

        let stats = t.query_stats();
        assert!(stats.iter().any(|s| s.query == "a"));
        assert!(!stats.iter().any(|s| s.query == "b"));
    }

    #[test]
    fn test_grid_round_trip() {
        let columns = vec!["id".to_string(), "nama".to_string()];
        let rows = vec![vec!["1".to_string(), "Budi".to_string()]];
        let encoded = encode_grid(&columns, &rows);
        let (c, r) = decode_grid(encoded).unwrap();
        assert_eq!(c, columns);
        assert_eq!(r, rows);
    }
}
