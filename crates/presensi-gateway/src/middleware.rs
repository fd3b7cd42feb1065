//! HTTP middleware: per-IP rate limiting and request admission
//!
//! Layer order on /api routes is rate limiter first, then admission.
//! A rate-limited client never consumes an admission slot, and admin
//! surfaces bypass both so the breaker can always be inspected and reset.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use presensi_common::error::ErrorClass;

use crate::admission::{AdmitError, Outcome};
use crate::http_api::AppState;

/// Reject clients over their per-IP request budget
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    if let Err(retry_after) = state.limiter.check(ip) {
        warn!(
            client_ip = %ip,
            retry_after_secs = retry_after,
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "too many requests",
                "code": "RATE_LIMITED",
                "retry_after_secs": retry_after,
            })),
        )
            .into_response();
        set_retry_after(&mut response, retry_after);
        return response;
    }
    next.run(request).await
}

/// Admit the request through the priority queues and circuit breaker,
/// enforce the handler deadline, and report the outcome to the breaker.
pub async fn admission(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let priority = state
        .routes
        .classify(request.method(), request.uri().path());

    let permit = match state.admission.admit(priority).await {
        Ok(permit) => permit,
        Err(err) => return admit_rejection(&state, err),
    };
    let request_id = permit.id();
    debug!(
        request_id,
        priority = priority.as_str(),
        path = %request.uri().path(),
        "Request admitted"
    );

    let deadline = state.admission.request_timeout();
    let mut response = match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => {
            let outcome = response_outcome(&response);
            permit.complete(outcome);
            response
        }
        Err(_) => {
            warn!(
                request_id,
                deadline_ms = deadline.as_millis() as u64,
                "Request exceeded its deadline"
            );
            permit.complete(Outcome::Timeout);
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({
                    "error": "request deadline exceeded",
                    "code": "DEADLINE_EXCEEDED",
                })),
            )
                .into_response()
        }
    };

    annotate(&mut response, &state, request_id);
    response
}

/// Derive the breaker outcome from the handler's response. Handlers attach
/// their [`ErrorClass`] as an extension; without one, any 5xx counts as an
/// infrastructure failure.
fn response_outcome(response: &Response) -> Outcome {
    if let Some(class) = response.extensions().get::<ErrorClass>() {
        return Outcome::Failure(*class);
    }
    if response.status().is_server_error() {
        Outcome::Failure(ErrorClass::Infrastructure)
    } else {
        Outcome::Success
    }
}

fn admit_rejection(state: &AppState, err: AdmitError) -> Response {
    let retry_after = err.retry_after_secs();
    let mut response = (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": err.to_string(),
            "code": err.code(),
            "retry_after_secs": retry_after,
        })),
    )
        .into_response();
    if let Some(secs) = retry_after {
        set_retry_after(&mut response, secs);
    }
    annotate(&mut response, state, 0);
    response
}

fn annotate(response: &mut Response, state: &AppState, request_id: u64) {
    if request_id > 0 {
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("x-request-id", value);
        }
    }
    let stats = state.admission.header_stats();
    if let Ok(value) = HeaderValue::from_str(&stats.to_string()) {
        response
            .headers_mut()
            .insert("x-load-balancer-stats", value);
    }
}

fn set_retry_after(response: &mut Response, secs: u64) {
    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
        response.headers_mut().insert("retry-after", value);
    }
}

/// Client IP: X-Forwarded-For's first hop when present (the gateway sits
/// behind a reverse proxy), otherwise the socket peer.
fn client_ip(request: &Request) -> IpAddr {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), IpAddr::from([203, 0, 113, 9]));
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 4000))));
        assert_eq!(client_ip(&request), IpAddr::from([192, 168, 1, 7]));
    }

    #[test]
    fn test_response_outcome_from_extension() {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::CONFLICT;
        response.extensions_mut().insert(ErrorClass::Business);
        assert_eq!(
            response_outcome(&response),
            Outcome::Failure(ErrorClass::Business)
        );
    }

    #[test]
    fn test_bare_5xx_is_infrastructure_failure() {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        assert_eq!(
            response_outcome(&response),
            Outcome::Failure(ErrorClass::Infrastructure)
        );
    }

    #[test]
    fn test_2xx_is_success() {
        let response = Response::new(axum::body::Body::empty());
        assert_eq!(response_outcome(&response), Outcome::Success);
    }
}
