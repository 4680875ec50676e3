//! Route handlers for the `/proxy` API.
//!
//! Every handler records a request metric; fetch handlers also log the
//! outcome with the request ID so a client-visible error can be traced.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

use crate::cache::CacheStats;
use crate::fetch::{ErrorKind, FetchError, FetchOutcome, FetchRequest, SwaggerOptions};
use crate::http::request::request_id;
use crate::http::response::{resilience_headers, ApiError};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::origin_of;
use crate::resilience::CircuitStats;

const ALLOWED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwaggerQuery {
    pub url: Option<String>,
    #[serde(default)]
    pub no_cache: bool,
    /// Per-attempt timeout in milliseconds.
    pub timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    pub origin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    pub url: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    /// Per-attempt timeout in milliseconds.
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    pub status: Option<u16>,
    pub body: Value,
    /// Milliseconds.
    pub duration: u64,
    pub circuit_state: crate::resilience::CircuitStatus,
    pub attempts: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub circuit_breaker: CircuitStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub cache: CacheStats,
    pub circuit_breaker: CircuitSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSummary {
    pub origins: usize,
    pub open: usize,
    pub half_open: usize,
    pub closed: usize,
}

/// `GET /proxy/swagger`
pub async fn get_swagger(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<SwaggerQuery>, QueryRejection>,
) -> Response {
    let start = Instant::now();
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            let error = FetchError::validation("", format!("invalid query: {}", rejection.body_text()));
            let response = ApiError(error).into_response();
            metrics::record_request("swagger", response.status().as_u16(), start);
            return response;
        }
    };
    let url = query.url.unwrap_or_default();
    let options = SwaggerOptions {
        use_cache: !query.no_cache,
        timeout: query.timeout.map(Duration::from_millis),
    };

    let result = state.fetcher.fetch_swagger_spec(&url, options).await;
    log_fetch(request_id(&headers), "swagger", &url, &result);

    let response = match result {
        Ok(outcome) => {
            let headers = resilience_headers(outcome.from_cache, outcome.circuit_state, outcome.attempt);
            (headers, Json(outcome.data)).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    };
    metrics::record_request("swagger", response.status().as_u16(), start);
    response
}

/// `POST /proxy/swagger/invalidate`
pub async fn invalidate_swagger(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();
    let response = match parse_optional_body::<InvalidateRequest>(&body) {
        Ok(InvalidateRequest { url: Some(url) }) => match state.fetcher.invalidate(&url) {
            Ok(removed) => {
                tracing::info!(url = %url, removed, "Cache entry invalidated");
                Json(json!({ "success": true, "invalidated": url, "removed": usize::from(removed) }))
                    .into_response()
            }
            Err(e) => ApiError(e).into_response(),
        },
        Ok(InvalidateRequest { url: None }) => {
            let removed = state.fetcher.invalidate_all();
            tracing::info!(removed, "Cache cleared");
            Json(json!({ "success": true, "invalidated": "all", "removed": removed })).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    };
    metrics::record_request("swagger_invalidate", response.status().as_u16(), start);
    response
}

/// `GET /proxy/swagger/stats`
pub async fn swagger_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let start = Instant::now();
    let stats = StatsResponse {
        cache: state.fetcher.cache_stats(),
        circuit_breaker: state.fetcher.circuit_stats(),
    };
    metrics::record_request("swagger_stats", 200, start);
    Json(stats)
}

/// `POST /proxy/circuit/reset`
pub async fn reset_circuit(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();
    let response = match parse_optional_body::<ResetRequest>(&body) {
        Ok(request) => {
            // Accept either a bare origin or any URL on it.
            let origin = request.origin.map(|raw| match Url::parse(&raw) {
                Ok(url) if url.has_host() => origin_of(&url),
                _ => raw,
            });
            let reset = state.fetcher.breaker().reset(origin.as_deref());
            Json(json!({
                "success": true,
                "origin": origin.as_deref().unwrap_or("all"),
                "reset": reset,
            }))
            .into_response()
        }
        Err(e) => ApiError(e).into_response(),
    };
    metrics::record_request("circuit_reset", response.status().as_u16(), start);
    response
}

/// `POST /proxy/execute`
pub async fn execute(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let rid = request_id(&headers).to_string();

    let result = match parse_optional_body::<ExecuteRequest>(&body).and_then(build_execute_request) {
        Ok(request) => {
            let url = request.url.clone();
            let result = state.fetcher.fetch(request).await;
            log_fetch(&rid, "execute", &url, &result);
            result
        }
        Err(e) => {
            tracing::debug!(request_id = %rid, error = %e, "Rejected execute request");
            Err(e)
        }
    };

    let response = match result {
        Ok(outcome) => {
            let headers = resilience_headers(false, outcome.circuit_state, outcome.attempt);
            let body = ExecuteResponse {
                success: true,
                status: outcome.status,
                body: text_or_json(outcome.data),
                duration: outcome.duration_ms,
                circuit_state: outcome.circuit_state,
                attempts: outcome.attempt,
            };
            (headers, Json(body)).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    };
    metrics::record_request("execute", response.status().as_u16(), start);
    response
}

/// `GET /proxy/health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let start = Instant::now();
    let circuits = state.fetcher.circuit_stats();
    let summary = CircuitSummary {
        origins: circuits.origins.len(),
        open: circuits.open,
        half_open: circuits.half_open,
        closed: circuits.closed,
    };
    let response = HealthResponse {
        status: if summary.open > 0 { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        cache: state.fetcher.cache_stats(),
        circuit_breaker: summary,
    };
    metrics::record_request("health", 200, start);
    Json(response)
}

/// Turn an execute body into a fetch. Execute calls are never cached.
fn build_execute_request(body: ExecuteRequest) -> Result<FetchRequest, FetchError> {
    let url = body.url.unwrap_or_default();

    let method = match body.method.as_deref() {
        None => Method::GET,
        Some(raw) => Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
            .ok()
            .filter(|m| ALLOWED_METHODS.contains(m))
            .ok_or_else(|| FetchError::validation(&url, format!("unsupported method '{raw}'")))?,
    };

    let mut headers = HeaderMap::new();
    for (name, value) in &body.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::validation(&url, format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::validation(&url, format!("invalid value for header '{name}'")))?;
        headers.insert(name, value);
    }

    let mut request = FetchRequest::new(method, &url).with_cache(false).with_json(false);
    if let Some(payload) = body.body {
        let bytes = match payload {
            Value::Null => None,
            Value::String(text) => Some(Bytes::from(text)),
            other => {
                headers
                    .entry(axum::http::header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/json"));
                Some(Bytes::from(other.to_string()))
            }
        };
        if let Some(bytes) = bytes {
            request = request.with_body(bytes);
        }
    }
    if let Some(ms) = body.timeout {
        request = request.with_timeout(Duration::from_millis(ms));
    }
    if let Some(retries) = body.retries {
        request = request.with_retries(retries);
    }
    Ok(request.with_headers(headers))
}

/// Upstream bodies are returned as JSON when they parse, else as text.
fn text_or_json(data: Value) -> Value {
    match data {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}

/// Parse a JSON body; an empty body means "no parameters".
fn parse_optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, FetchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| FetchError::validation("", format!("invalid JSON body: {e}")))
}

fn log_fetch(request_id: &str, route: &'static str, url: &str, result: &Result<FetchOutcome, FetchError>) {
    match result {
        Ok(outcome) => {
            let outcome_label = if outcome.from_cache { "cache_hit" } else { "success" };
            metrics::record_fetch(outcome_label, outcome.attempt);
            tracing::debug!(
                request_id = %request_id,
                route,
                url = %url,
                from_cache = outcome.from_cache,
                attempts = outcome.attempt,
                circuit = %outcome.circuit_state,
                duration_ms = outcome.duration_ms,
                "Fetch succeeded"
            );
        }
        Err(e) => {
            metrics::record_fetch(e.kind.as_str(), e.attempts);
            match e.kind {
                ErrorKind::ValidationError => tracing::debug!(
                    request_id = %request_id, route, url = %url, error = %e, "Rejected fetch"
                ),
                _ => tracing::warn!(
                    request_id = %request_id,
                    route,
                    url = %url,
                    error_type = %e.kind,
                    attempts = e.attempts,
                    error = %e.message,
                    "Fetch failed"
                ),
            }
        }
    }
}
