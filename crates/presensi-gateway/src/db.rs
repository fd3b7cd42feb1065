//! MySQL connection pool and raw query execution
//!
//! Wraps an sqlx pool behind a small API the executor uses. Connection
//! establishment retries forever: the gateway is useless without its
//! database, so it keeps trying rather than crash-looping under an
//! external supervisor.

use std::time::Duration;

use serde::Serialize;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row};
use tracing::{error, info, warn};

use presensi_common::config::DatabaseConfig;
use presensi_common::error::{ErrorClass, PresensiError};

use crate::metrics;

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Shared database handle. Clones share the underlying pool.
#[derive(Clone)]
pub struct Database {
    pool: MySqlPool,
    max_connections: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatsSnapshot {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
    pub max_connections: u32,
}

impl Database {
    /// Connect to MySQL, retrying every few seconds until it succeeds
    pub async fn connect(cfg: &DatabaseConfig) -> Self {
        let options = MySqlPoolOptions::new()
            .max_connections(cfg.max_connections)
            .min_connections(cfg.min_connections)
            .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs));

        loop {
            match options.clone().connect(&cfg.url()).await {
                Ok(pool) => {
                    info!(
                        host = %cfg.host,
                        port = cfg.port,
                        database = %cfg.database,
                        max_connections = cfg.max_connections,
                        "Connected to MySQL"
                    );
                    return Self {
                        pool,
                        max_connections: cfg.max_connections,
                    };
                }
                Err(err) => {
                    error!(
                        host = %cfg.host,
                        port = cfg.port,
                        error = %err,
                        "Failed to connect to MySQL, retrying in {}s",
                        CONNECT_RETRY_DELAY.as_secs()
                    );
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Run a statement and return the affected row count
    pub async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<u64, PresensiError> {
        let query = bind_params(sqlx::query(sql), params)?;
        let result = query.execute(&self.pool).await.map_err(to_error)?;
        Ok(result.rows_affected())
    }

    /// Run a query and return column names plus a stringified row grid
    pub async fn fetch_all(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<(Vec<String>, Vec<Vec<String>>), PresensiError> {
        let query = bind_params(sqlx::query(sql), params)?;
        let rows = query.fetch_all(&self.pool).await.map_err(to_error)?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let grid = rows.iter().map(stringify_row).collect();
        Ok((columns, grid))
    }

    /// Start a transaction on a dedicated connection.
    ///
    /// The returned transaction rolls back on drop unless committed, so
    /// the connection returns to the pool on every exit path.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::MySql>, PresensiError> {
        self.pool.begin().await.map_err(to_error)
    }

    /// Check liveness with a trivial round trip
    pub async fn ping(&self) -> Result<(), PresensiError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(to_error)?;
        Ok(())
    }

    /// Snapshot of pool utilization, also pushed to the metrics gauges
    pub fn stats(&self) -> PoolStatsSnapshot {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let active = total.saturating_sub(idle);
        metrics::set_pool_connections(active as u64, idle as u64);
        PoolStatsSnapshot {
            total_connections: total,
            idle_connections: idle,
            active_connections: active,
            max_connections: self.max_connections,
        }
    }
}

type MySqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

/// Bind JSON parameter values positionally. Arrays and objects are rejected;
/// they have no single-placeholder MySQL representation.
fn bind_params<'q>(
    mut query: MySqlQuery<'q>,
    params: &'q [serde_json::Value],
) -> Result<MySqlQuery<'q>, PresensiError> {
    for param in params {
        query = match param {
            serde_json::Value::Null => query.bind(None::<String>),
            serde_json::Value::Bool(b) => query.bind(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(f) = n.as_f64() {
                    query.bind(f)
                } else {
                    return Err(PresensiError::InvalidArgument(format!(
                        "unsupported numeric parameter: {n}"
                    )));
                }
            }
            serde_json::Value::String(s) => query.bind(s.as_str()),
            other => {
                return Err(PresensiError::InvalidArgument(format!(
                    "unsupported parameter type: {other}"
                )));
            }
        };
    }
    Ok(query)
}

/// Render every column of a row as a string, trying the common MySQL
/// decodings in order. Values no decoding accepts come back as "<binary>".
fn stringify_row(row: &MySqlRow) -> Vec<String> {
    (0..row.columns().len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                return v.map_or_else(|| "NULL".to_string(), |v| v.to_string());
            }
            if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                return v.map_or_else(|| "NULL".to_string(), |v| v.to_string());
            }
            // TIMESTAMP / DATETIME / DATE / TIME render in their natural
            // chrono form
            if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
                return v.map_or_else(|| "NULL".to_string(), |v| v.to_rfc3339());
            }
            if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
                return v.map_or_else(|| "NULL".to_string(), |v| v.to_string());
            }
            if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
                return v.map_or_else(|| "NULL".to_string(), |v| v.to_string());
            }
            if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(i) {
                return v.map_or_else(|| "NULL".to_string(), |v| v.to_string());
            }
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                return v.unwrap_or_else(|| "NULL".to_string());
            }
            if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(i) {
                return v.map_or_else(
                    || "NULL".to_string(),
                    |bytes| String::from_utf8_lossy(&bytes).into_owned(),
                );
            }
            "<binary>".to_string()
        })
        .collect()
}

/// Map an sqlx error to [`PresensiError`] with its breaker classification
fn to_error(err: sqlx::Error) -> PresensiError {
    let class = classify(&err);
    if class == ErrorClass::Infrastructure {
        warn!(error = %err, "Infrastructure database error");
    }
    PresensiError::Database {
        message: err.to_string(),
        class,
    }
}

/// Decide whether an sqlx error reflects unhealthy infrastructure or a
/// well-formed request the data rejected.
pub fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db) => {
            use sqlx::error::ErrorKind;
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => ErrorClass::Business,
                _ => ErrorClass::Infrastructure,
            }
        }
        // The query asked for something that is not there or does not decode
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => ErrorClass::Business,
        _ => ErrorClass::Infrastructure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_errors_as_infrastructure() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(classify(&err), ErrorClass::Infrastructure);
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), ErrorClass::Infrastructure);
    }

    #[test]
    fn test_classify_shape_errors_as_business() {
        assert_eq!(classify(&sqlx::Error::RowNotFound), ErrorClass::Business);
        assert_eq!(
            classify(&sqlx::Error::ColumnNotFound("nama".into())),
            ErrorClass::Business
        );
    }

    #[test]
    fn test_bind_rejects_nested_params() {
        let params = vec![serde_json::json!([1, 2, 3])];
        let result = bind_params(sqlx::query("SELECT ?"), &params);
        assert!(matches!(result, Err(PresensiError::InvalidArgument(_))));
    }
}
