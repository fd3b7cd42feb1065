//! Route-to-priority classification
//!
//! A request's priority class is decided by an explicit lookup table
//! (longest matching prefix, optionally constrained by method), not by
//! substring matching on the path.

use axum::http::Method;

use crate::admission::Priority;

struct RouteRule {
    prefix: &'static str,
    /// None matches any method
    method: Option<Method>,
    priority: Priority,
}

/// Priority lookup table for API routes
pub struct RouteTable {
    rules: Vec<RouteRule>,
    default: Priority,
}

impl RouteTable {
    /// The deployment's route classes:
    /// attendance writes and logins are critical, attendance/dashboard
    /// reads are high, reporting is normal, everything else is low.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                RouteRule {
                    prefix: "/api/attendance",
                    method: Some(Method::POST),
                    priority: Priority::Critical,
                },
                RouteRule {
                    prefix: "/api/auth/login",
                    method: Some(Method::POST),
                    priority: Priority::Critical,
                },
                RouteRule {
                    prefix: "/api/attendance",
                    method: Some(Method::GET),
                    priority: Priority::High,
                },
                RouteRule {
                    prefix: "/api/dashboard",
                    method: None,
                    priority: Priority::High,
                },
                RouteRule {
                    prefix: "/api/reports",
                    method: None,
                    priority: Priority::Normal,
                },
                RouteRule {
                    prefix: "/api/analytics",
                    method: None,
                    priority: Priority::Normal,
                },
            ],
            default: Priority::Low,
        }
    }

    /// Classify a request; unknown routes get the default (lowest) class
    pub fn classify(&self, method: &Method, path: &str) -> Priority {
        self.rules
            .iter()
            .filter(|r| prefix_matches(path, r.prefix))
            .filter(|r| r.method.as_ref().map_or(true, |m| m == method))
            .max_by_key(|r| r.prefix.len())
            .map(|r| r.priority)
            .unwrap_or(self.default)
    }
}

/// Prefix match on segment boundaries: "/api/attendance" matches itself and
/// "/api/attendance/...", never "/api/attendance-notes".
fn prefix_matches(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attendance_write_is_critical() {
        let table = RouteTable::standard();
        assert_eq!(
            table.classify(&Method::POST, "/api/attendance/checkin"),
            Priority::Critical
        );
        assert_eq!(
            table.classify(&Method::POST, "/api/auth/login"),
            Priority::Critical
        );
    }

    #[test]
    fn test_attendance_read_is_high() {
        let table = RouteTable::standard();
        assert_eq!(
            table.classify(&Method::GET, "/api/attendance/today"),
            Priority::High
        );
        assert_eq!(
            table.classify(&Method::GET, "/api/dashboard/summary"),
            Priority::High
        );
    }

    #[test]
    fn test_reports_are_normal() {
        let table = RouteTable::standard();
        assert_eq!(
            table.classify(&Method::GET, "/api/reports/monthly"),
            Priority::Normal
        );
        assert_eq!(
            table.classify(&Method::POST, "/api/analytics/export"),
            Priority::Normal
        );
    }

    #[test]
    fn test_unknown_routes_default_to_low() {
        let table = RouteTable::standard();
        assert_eq!(table.classify(&Method::GET, "/api/misc"), Priority::Low);
        assert_eq!(
            table.classify(&Method::DELETE, "/api/attendance/1"),
            Priority::Low
        );
    }

    #[test]
    fn test_prefix_match_not_substring() {
        let table = RouteTable::standard();
        // "attendance" appearing mid-path does not classify the route
        assert_eq!(
            table.classify(&Method::POST, "/api/misc/attendance-notes"),
            Priority::Low
        );
    }

    #[test]
    fn test_prefix_matches_on_segment_boundary_only() {
        let table = RouteTable::standard();
        // A sibling route sharing the prefix text is not the same route
        assert_eq!(
            table.classify(&Method::POST, "/api/attendance-notes"),
            Priority::Low
        );
        assert_eq!(
            table.classify(&Method::POST, "/api/attendance"),
            Priority::Critical
        );
        assert_eq!(
            table.classify(&Method::POST, "/api/attendance/checkin"),
            Priority::Critical
        );
    }
}
