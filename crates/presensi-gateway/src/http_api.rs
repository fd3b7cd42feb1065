//! HTTP API: the query endpoint plus the admin/observability surface
//!
//! /api/* routes pass through the rate limiter and admission controller;
//! health, metrics, and /admin/* do not, so operators can always inspect
//! and reset a tripped breaker.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use presensi_common::error::PresensiError;

use crate::admission::AdmissionController;
use crate::cache::QueryCache;
use crate::db::Database;
use crate::executor::{CachePolicy, QueryExecutor};
use crate::metrics;
use crate::middleware;
use crate::monitor::SystemMonitor;
use crate::rate_limit::RateLimiter;
use crate::routes::RouteTable;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cache: Arc<QueryCache>,
    pub executor: Arc<QueryExecutor>,
    pub admission: AdmissionController,
    pub monitor: Arc<SystemMonitor>,
    pub limiter: RateLimiter,
    pub routes: Arc<RouteTable>,
}

/// Build the full router with middleware applied
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/query", post(run_query))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admission,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    let admin = Router::new()
        .route("/pool", get(pool_stats))
        .route("/cache", get(cache_stats).delete(clear_cache))
        .route("/slow-queries", get(slow_queries))
        .route("/query-stats", get(query_stats))
        .route("/breaker", get(breaker_stats))
        .route("/breaker/reset", post(reset_breaker))
        .route("/admission", get(admission_stats))
        .route("/alerts", get(alerts))
        .route("/rate-limit", get(rate_limit_stats));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api", api)
        .nest("/admin", admin)
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR MAPPING
// ═══════════════════════════════════════════════════════════════════════════

/// Handler error wrapper. The response carries the error's breaker
/// classification as an extension for the admission middleware to read.
pub struct ApiError(PresensiError);

impl From<PresensiError> for ApiError {
    fn from(err: PresensiError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let class = self.0.class();
        let mut response = (
            status,
            Json(json!({
                "error": self.0.to_string(),
                "code": self.0.code(),
            })),
        )
            .into_response();
        response.extensions_mut().insert(class);
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// QUERY ENDPOINT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    /// Caching applies to read queries only
    #[serde(default = "default_true")]
    pub use_cache: bool,
    pub cache_ttl_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_count: usize,
    pub rows_affected: Option<u64>,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

async fn run_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let sql = request.sql.trim();
    if sql.is_empty() {
        return Err(PresensiError::InvalidArgument("empty query".into()).into());
    }

    if is_read_query(sql) {
        let policy = CachePolicy {
            use_cache: request.use_cache,
            ttl: request
                .cache_ttl_secs
                .map(std::time::Duration::from_secs),
        };
        let result = state.executor.fetch(sql, &request.params, policy).await?;
        Ok(Json(QueryResponse {
            row_count: result.rows.len(),
            columns: result.columns,
            rows: result.rows,
            rows_affected: None,
            from_cache: result.from_cache,
            elapsed_ms: result.elapsed_ms,
        }))
    } else {
        let started = std::time::Instant::now();
        let affected = state.executor.execute(sql, &request.params).await?;
        Ok(Json(QueryResponse {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            rows_affected: Some(affected),
            from_cache: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }))
    }
}

/// Whether a statement is a read (cacheable) query
pub fn is_read_query(sql: &str) -> bool {
    let head = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .to_ascii_uppercase();
    head.starts_with("SELECT")
        || head.starts_with("WITH")
        || head.starts_with("SHOW")
        || head.starts_with("DESCRIBE")
}

// ═══════════════════════════════════════════════════════════════════════════
// ADMIN SURFACE
// ═══════════════════════════════════════════════════════════════════════════

async fn pool_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.db.stats())
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats())
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    let dropped = state.cache.clear();
    info!(dropped, "Query cache cleared by admin request");
    Json(json!({ "cleared": dropped }))
}

async fn slow_queries(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.executor.tracker().slow_queries();
    Json(json!({
        "threshold_ms": state.executor.tracker().slow_threshold().as_millis() as u64,
        "count": report.len(),
        "entries": report,
    }))
}

async fn query_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.executor.tracker().query_stats())
}

async fn breaker_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.admission.stats().breaker)
}

async fn reset_breaker(State(state): State<AppState>) -> impl IntoResponse {
    state.admission.reset_breaker();
    Json(json!({ "state": state.admission.breaker_state() }))
}

async fn admission_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.admission.stats())
}

async fn alerts(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.alerts())
}

async fn rate_limit_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.limiter.stats())
}

// ═══════════════════════════════════════════════════════════════════════════
// HEALTH + METRICS
// ═══════════════════════════════════════════════════════════════════════════

async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "presensi-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness requires a live database round trip
async fn ready(State(state): State<AppState>) -> Response {
    match state.db.ping().await {
        Ok(()) => Json(json!({ "status": "ready" })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {err}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_query_detection() {
        assert!(is_read_query("SELECT * FROM siswa"));
        assert!(is_read_query("  select id from guru"));
        assert!(is_read_query("(SELECT 1)"));
        assert!(is_read_query("SHOW TABLES"));
        assert!(is_read_query(
            "WITH hadir AS (SELECT siswa_id FROM absensi) SELECT * FROM hadir"
        ));
        assert!(!is_read_query("INSERT INTO absensi VALUES (1)"));
        assert!(!is_read_query("UPDATE siswa SET nama = ?"));
        assert!(!is_read_query("DELETE FROM absensi"));
    }

    #[test]
    fn test_query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"sql": "SELECT 1"}"#).unwrap();
        assert!(req.use_cache);
        assert!(req.params.is_empty());
        assert!(req.cache_ttl_secs.is_none());
    }
}
