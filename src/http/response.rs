//! Response shaping for the proxy routes.
//!
//! # Responsibilities
//! - Map fetch failures to HTTP status codes
//! - Render the structured error body and resilience headers
//!
//! # Design Decisions
//! - Callers never see a raw error page; every failure is JSON
//! - An open circuit answers 503 with `Retry-After`

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::fetch::{ErrorKind, FetchError};
use crate::resilience::circuit_breaker::epoch_millis;
use crate::resilience::CircuitStatus;

pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");
pub const X_CIRCUIT_STATE: HeaderName = HeaderName::from_static("x-circuit-state");
pub const X_RETRY_ATTEMPTS: HeaderName = HeaderName::from_static("x-retry-attempts");

/// Body of every failed proxy call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub error_type: ErrorKind,
    pub url: String,
    pub suggestion: &'static str,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_retry_at: Option<u64>,
}

/// A fetch failure on its way out to the client.
#[derive(Debug)]
pub struct ApiError(pub FetchError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::BAD_GATEWAY)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.0;

        let mut headers = HeaderMap::new();
        headers.insert(X_RETRY_ATTEMPTS, HeaderValue::from(error.attempts));
        if let Some(state) = error.details.get("circuitState").and_then(Value::as_str) {
            if let Ok(value) = HeaderValue::from_str(state) {
                headers.insert(X_CIRCUIT_STATE, value);
            }
        }
        if error.kind == ErrorKind::CircuitOpen {
            if let Some(at) = error.will_retry_at {
                let secs = at.saturating_sub(epoch_millis()).div_ceil(1000).max(1);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
        }

        let body = ErrorBody {
            success: false,
            error: error.message,
            error_type: error.kind,
            url: error.url,
            suggestion: error.kind.suggestion(),
            details: error.details,
            will_retry_at: error.will_retry_at,
        };
        (status, headers, Json(body)).into_response()
    }
}

/// Resilience headers attached to successful proxy responses.
pub fn resilience_headers(from_cache: bool, circuit: CircuitStatus, attempts: u32) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        X_CACHE_STATUS,
        HeaderValue::from_static(if from_cache { "HIT" } else { "MISS" }),
    );
    headers.insert(X_CIRCUIT_STATE, HeaderValue::from_static(circuit.as_str()));
    headers.insert(X_RETRY_ATTEMPTS, HeaderValue::from(attempts));
    headers
}
