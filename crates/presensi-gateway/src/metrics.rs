//! Prometheus metrics for the gateway

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

pub static ACTIVE_REQUESTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "presensi_active_requests",
        "Requests currently admitted and in flight"
    )
    .unwrap()
});

pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "presensi_queue_depth",
        "Requests waiting in each admission queue",
        &["priority"]
    )
    .unwrap()
});

pub static ADMITTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "presensi_admitted_total",
        "Requests admitted, by priority",
        &["priority"]
    )
    .unwrap()
});

pub static REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "presensi_rejected_total",
        "Requests rejected at admission, by reason",
        &["reason"]
    )
    .unwrap()
});

pub static COMPLETED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "presensi_completed_total",
        "Admitted requests completed, by priority and outcome",
        &["priority", "outcome"]
    )
    .unwrap()
});

pub static QUEUE_WAIT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "presensi_queue_wait_seconds",
        "Time spent waiting in the admission queue",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

/// 0 = closed, 1 = open, 2 = half-open
pub static BREAKER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "presensi_breaker_state",
        "Circuit breaker state (0=closed, 1=open, 2=half_open)"
    )
    .unwrap()
});

pub static BREAKER_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "presensi_breaker_transitions_total",
        "Circuit breaker state transitions, by target state",
        &["to"]
    )
    .unwrap()
});

pub static BURSTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "presensi_bursts_total",
        "Traffic bursts detected (edge-triggered)"
    )
    .unwrap()
});

pub static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("presensi_cache_hits_total", "Query cache hits").unwrap()
});

pub static CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("presensi_cache_misses_total", "Query cache misses").unwrap()
});

pub static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "presensi_cache_evictions_total",
        "Query cache entries evicted at capacity"
    )
    .unwrap()
});

pub static QUERY_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "presensi_query_duration_seconds",
        "Database query execution time",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap()
});

pub static SLOW_QUERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "presensi_slow_queries_total",
        "Queries exceeding the slow-query threshold"
    )
    .unwrap()
});

pub static RATE_LIMITED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "presensi_rate_limited_total",
        "Requests rejected by the per-IP rate limiter"
    )
    .unwrap()
});

pub static POOL_ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "presensi_pool_active_connections",
        "Connections checked out of the database pool"
    )
    .unwrap()
});

pub static POOL_IDLE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "presensi_pool_idle_connections",
        "Idle connections in the database pool"
    )
    .unwrap()
});

pub static MONITOR_ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "presensi_monitor_alerts_total",
        "Threshold alerts raised by the system monitor",
        &["metric"]
    )
    .unwrap()
});

pub static PROCESS_MEMORY_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "presensi_process_memory_bytes",
        "Resident memory of the gateway process"
    )
    .unwrap()
});

pub static PROCESS_CPU_PERCENT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "presensi_process_cpu_percent",
        "CPU usage of the gateway process"
    )
    .unwrap()
});

/// Touch every Lazy so all series exist from startup
pub fn init_metrics() {
    ACTIVE_REQUESTS.set(0);
    for priority in ["critical", "high", "normal", "low"] {
        QUEUE_DEPTH.with_label_values(&[priority]).set(0);
    }
    BREAKER_STATE.set(0);
    Lazy::force(&ADMITTED_TOTAL);
    Lazy::force(&REJECTED_TOTAL);
    Lazy::force(&COMPLETED_TOTAL);
    Lazy::force(&QUEUE_WAIT_SECONDS);
    Lazy::force(&BREAKER_TRANSITIONS);
    Lazy::force(&BURSTS_TOTAL);
    Lazy::force(&CACHE_HITS);
    Lazy::force(&CACHE_MISSES);
    Lazy::force(&CACHE_EVICTIONS);
    Lazy::force(&QUERY_DURATION_SECONDS);
    Lazy::force(&SLOW_QUERIES_TOTAL);
    Lazy::force(&RATE_LIMITED_TOTAL);
    Lazy::force(&POOL_ACTIVE_CONNECTIONS);
    Lazy::force(&POOL_IDLE_CONNECTIONS);
    Lazy::force(&MONITOR_ALERTS_TOTAL);
    Lazy::force(&PROCESS_MEMORY_BYTES);
    Lazy::force(&PROCESS_CPU_PERCENT);
}

pub fn set_active_requests(n: usize) {
    ACTIVE_REQUESTS.set(n as i64);
}

pub fn set_queue_depth(priority: &str, depth: usize) {
    QUEUE_DEPTH.with_label_values(&[priority]).set(depth as i64);
}

pub fn record_admission(priority: &str) {
    ADMITTED_TOTAL.with_label_values(&[priority]).inc();
}

pub fn record_rejection(reason: &str) {
    REJECTED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_completion(priority: &str, outcome: &str) {
    COMPLETED_TOTAL.with_label_values(&[priority, outcome]).inc();
}

pub fn observe_queue_wait(seconds: f64) {
    QUEUE_WAIT_SECONDS.observe(seconds);
}

pub fn set_breaker_state(state: &str) {
    let value = match state {
        "open" => 1,
        "half_open" => 2,
        _ => 0,
    };
    BREAKER_STATE.set(value);
    BREAKER_TRANSITIONS.with_label_values(&[state]).inc();
}

pub fn record_burst() {
    BURSTS_TOTAL.inc();
}

pub fn record_cache_hit() {
    CACHE_HITS.inc();
}

pub fn record_cache_miss() {
    CACHE_MISSES.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS.inc();
}

pub fn observe_query_duration(seconds: f64) {
    QUERY_DURATION_SECONDS.observe(seconds);
}

pub fn record_slow_query() {
    SLOW_QUERIES_TOTAL.inc();
}

pub fn record_rate_limited() {
    RATE_LIMITED_TOTAL.inc();
}

pub fn set_pool_connections(active: u64, idle: u64) {
    POOL_ACTIVE_CONNECTIONS.set(active as i64);
    POOL_IDLE_CONNECTIONS.set(idle as i64);
}

pub fn record_alert(metric: &str) {
    MONITOR_ALERTS_TOTAL.with_label_values(&[metric]).inc();
}

pub fn set_process_usage(memory_bytes: u64, cpu_percent: f32) {
    PROCESS_MEMORY_BYTES.set(memory_bytes as i64);
    PROCESS_CPU_PERCENT.set(cpu_percent as i64);
}

/// Render the default registry in Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
