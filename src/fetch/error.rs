//! Typed failure taxonomy for outbound fetches.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::transport::TransportError;
use crate::resilience::circuit_breaker::{epoch_millis, CircuitRejection};
use crate::resilience::retries::is_retryable_status;

/// Response bodies attached to errors are cut to this many bytes.
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

/// Classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    Network,
    HttpError,
    CircuitOpen,
    ParseError,
    ValidationError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::HttpError => "HTTP_ERROR",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Hint shown to API consumers next to the error.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "The upstream service did not answer in time. Retry later or raise the timeout.",
            ErrorKind::Network => "The upstream service is unreachable. Check the URL and that the service is running.",
            ErrorKind::HttpError => "The upstream service returned an error status. Inspect details.body for its response.",
            ErrorKind::CircuitOpen => "Too many recent failures for this origin. The circuit breaker will admit a probe after willRetryAt.",
            ErrorKind::ParseError => "The upstream response was not valid JSON. Verify the URL points to a JSON document.",
            ErrorKind::ValidationError => "Fix the request parameters and try again.",
            ErrorKind::Unknown => "An unexpected error occurred. Check the proxy logs.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified fetch failure. Every failure path of the fetch core ends in one.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct FetchError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub url: String,
    /// Status returned by the origin, when it answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Epoch milliseconds when the origin's breaker admits a probe again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_retry_at: Option<u64>,
    /// Network attempts made before giving up.
    pub attempts: u32,
    pub details: Value,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

impl FetchError {
    pub fn new(kind: ErrorKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: url.into(),
            status: None,
            will_retry_at: None,
            attempts: 0,
            details: Value::Object(Map::new()),
            timestamp: epoch_millis(),
        }
    }

    pub fn validation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, url, message)
    }

    pub fn timeout(url: impl Into<String>, deadline: Duration) -> Self {
        let deadline_ms = deadline.as_millis() as u64;
        Self::new(
            ErrorKind::Timeout,
            url,
            format!("request timed out after {deadline_ms}ms"),
        )
        .with_detail("timeoutMs", json!(deadline_ms))
    }

    pub fn network(url: impl Into<String>, cause: impl Into<String>) -> Self {
        let cause = cause.into();
        Self::new(ErrorKind::Network, url, format!("network error: {cause}"))
            .with_detail("cause", json!(cause))
    }

    pub fn http(url: impl Into<String>, status: u16, body: &[u8]) -> Self {
        let mut error = Self::new(
            ErrorKind::HttpError,
            url,
            format!("upstream responded with HTTP {status}"),
        )
        .with_detail("status", json!(status))
        .with_detail("body", body_excerpt(body));
        error.status = Some(status);
        error
    }

    pub fn parse(url: impl Into<String>, cause: &serde_json::Error) -> Self {
        Self::new(
            ErrorKind::ParseError,
            url,
            format!("response is not valid JSON: {cause}"),
        )
        .with_detail("line", json!(cause.line()))
        .with_detail("column", json!(cause.column()))
    }

    pub fn circuit_open(url: impl Into<String>, rejection: &CircuitRejection) -> Self {
        let mut error = Self::new(
            ErrorKind::CircuitOpen,
            url,
            format!("circuit breaker is {} for {}", rejection.status, rejection.origin),
        )
        .with_detail("origin", json!(rejection.origin))
        .with_detail("circuitState", json!(rejection.status));
        error.will_retry_at = Some(rejection.will_retry_at);
        error
    }

    pub fn from_transport(url: &str, error: TransportError) -> Self {
        match error {
            TransportError::Timeout | TransportError::Cancelled => {
                Self::new(ErrorKind::Timeout, url, format!("request timed out: {error}"))
            }
            TransportError::Connect(cause) | TransportError::Body(cause) => Self::network(url, cause),
            TransportError::Request(cause) => Self::validation(url, format!("invalid request: {cause}")),
            TransportError::Other(cause) => {
                Self::new(ErrorKind::Unknown, url, format!("unexpected error: {cause}"))
            }
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value);
        }
        self
    }

    /// Another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Timeout | ErrorKind::Network => true,
            ErrorKind::HttpError => self.status.map(is_retryable_status).unwrap_or(false),
            _ => false,
        }
    }

    /// The failure says something about the origin's health.
    pub fn counts_against_origin(&self) -> bool {
        self.is_retryable()
    }

    /// Status an HTTP facade should answer with.
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::Timeout => 504,
            ErrorKind::Network => 502,
            ErrorKind::HttpError => match self.status {
                Some(status) if (400..600).contains(&status) => status,
                _ => 502,
            },
            ErrorKind::CircuitOpen => 503,
            ErrorKind::ParseError => 502,
            ErrorKind::ValidationError => 400,
            ErrorKind::Unknown => 500,
        }
    }
}

/// Attach a response body as JSON when it parses, else as (truncated) text.
fn body_excerpt(body: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if body.len() <= MAX_ERROR_BODY_BYTES {
            return value;
        }
    }
    let end = body.len().min(MAX_ERROR_BODY_BYTES);
    Value::String(String::from_utf8_lossy(&body[..end]).into_owned())
}
