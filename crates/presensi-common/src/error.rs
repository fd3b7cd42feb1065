//! Error types for Presensi services

use serde::Serialize;
use std::fmt;

/// Result type alias using PresensiError
pub type Result<T> = std::result::Result<T, PresensiError>;

/// Classification of a failure for circuit-breaker accounting.
///
/// Infrastructure failures (connection refused, pool exhausted, I/O) indicate
/// the backing store is unhealthy and count against the breaker. Business
/// failures (constraint violations, bad input) say nothing about the
/// infrastructure and must not trip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Infrastructure,
    Business,
}

/// Main error type for Presensi services
#[derive(Debug, thiserror::Error)]
pub enum PresensiError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error, carrying its breaker classification
    #[error("Database error: {message}")]
    Database { message: String, class: ErrorClass },

    /// Invalid request/argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Rate limited
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    /// Request timed out
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PresensiError {
    /// Create an internal error from any error type
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        PresensiError::Internal(err.to_string())
    }

    /// Stable error code, suitable for clients to branch on
    pub fn code(&self) -> &'static str {
        match self {
            PresensiError::Config(_) => "CONFIG_ERROR",
            PresensiError::Database { .. } => "DATABASE_ERROR",
            PresensiError::InvalidArgument(_) => "INVALID_ARGUMENT",
            PresensiError::NotFound(_) => "NOT_FOUND",
            PresensiError::RateLimited(_) => "RATE_LIMITED",
            PresensiError::Timeout(_) => "DEADLINE_EXCEEDED",
            PresensiError::Serialization(_) => "SERIALIZATION_ERROR",
            PresensiError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PresensiError::Config(_) => 500,
            PresensiError::Database { class, .. } => match class {
                ErrorClass::Business => 409,
                ErrorClass::Infrastructure => 500,
            },
            PresensiError::InvalidArgument(_) => 400,
            PresensiError::NotFound(_) => 404,
            PresensiError::RateLimited(_) => 429,
            PresensiError::Timeout(_) => 504,
            PresensiError::Serialization(_) => 500,
            PresensiError::Internal(_) => 500,
        }
    }

    /// Breaker classification of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            PresensiError::Database { class, .. } => *class,
            PresensiError::Timeout(_) | PresensiError::Internal(_) => ErrorClass::Infrastructure,
            _ => ErrorClass::Business,
        }
    }
}

impl From<serde_json::Error> for PresensiError {
    fn from(err: serde_json::Error) -> Self {
        PresensiError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for PresensiError {
    fn from(err: std::io::Error) -> Self {
        PresensiError::Internal(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PresensiError::NotFound("test".into()).code(), "NOT_FOUND");
        assert_eq!(PresensiError::RateLimited(30).code(), "RATE_LIMITED");
    }

    #[test]
    fn test_status_codes_by_class() {
        let business = PresensiError::Database {
            message: "duplicate entry".into(),
            class: ErrorClass::Business,
        };
        let infra = PresensiError::Database {
            message: "connection refused".into(),
            class: ErrorClass::Infrastructure,
        };
        assert_eq!(business.status_code(), 409);
        assert_eq!(infra.status_code(), 500);
    }

    #[test]
    fn test_class_defaults() {
        assert_eq!(
            PresensiError::InvalidArgument("x".into()).class(),
            ErrorClass::Business
        );
        assert_eq!(
            PresensiError::Timeout(1000).class(),
            ErrorClass::Infrastructure
        );
    }
}
