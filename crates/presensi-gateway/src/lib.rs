//! Presensi Gateway - request admission and data-access control plane
//!
//! Sits between the attendance application and its MySQL database.
//! Responsibilities:
//! - Connection pooling and raw query execution ([`db`])
//! - Query result caching with TTL + FIFO eviction ([`cache`])
//! - Query timing statistics and the slow-query report ([`executor`])
//! - Priority-queued admission with a concurrency ceiling, circuit
//!   breaker, and burst detection ([`admission`])
//! - System threshold monitoring ([`monitor`])
//! - Per-IP rate limiting ([`rate_limit`])
//! - The HTTP surface wiring it all together ([`http_api`])

pub mod admission;
pub mod cache;
pub mod db;
pub mod executor;
pub mod http_api;
pub mod metrics;
pub mod middleware;
pub mod monitor;
pub mod rate_limit;
pub mod routes;
pub mod telemetry;
