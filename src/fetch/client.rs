//! Resilient fetch: one logical outbound request with caching, circuit
//! breaking, per-attempt timeouts and retry with backoff.
//!
//! # Flow
//! ```text
//! validate URL
//!     → cache lookup (GET + use_cache): hit returns without any I/O
//!     → circuit admission for the origin: rejection → CIRCUIT_OPEN
//!     → attempt loop (retries + 1):
//!         deadline + cancellation token → transport
//!         accepted status   → report success, decode, cache, return
//!         4xx               → report success (origin is alive), fail
//!         5xx/timeout/net   → report failure, backoff, re-check breaker
//! ```
//!
//! This module does not log. Callers own logging and HTTP mapping.

use arc_swap::ArcSwap;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::{cache_key, CacheStats, TtlCache};
use crate::config::{CacheConfig, FetchConfig, ProxyConfig, SwaggerConfig};
use crate::fetch::error::{ErrorKind, FetchError};
use crate::fetch::transport::{Transport, TransportRequest, TransportResponse};
use crate::resilience::circuit_breaker::origin_of;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{CircuitBreaker, CircuitStats, CircuitStatus, RetryPolicy};

/// Defaults applied to every fetch; swappable at runtime on config reload.
#[derive(Debug, Clone, Default)]
pub struct FetchSettings {
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub swagger: SwaggerConfig,
}

impl FetchSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            fetch: config.fetch.clone(),
            cache: config.cache.clone(),
            swagger: config.swagger.clone(),
        }
    }
}

/// Parameters of one logical fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Per-attempt timeout; falls back to `fetch.timeout_ms`.
    pub timeout: Option<Duration>,
    /// Attempts after the first; falls back to `fetch.retries`.
    pub retries: Option<u32>,
    /// Read and write the cache (only honoured for GET).
    pub use_cache: bool,
    /// Falls back to `cache.default_ttl_ms`.
    pub cache_ttl: Option<Duration>,
    pub parse_json: bool,
    /// Statuses treated as success; defaults to 2xx.
    pub accept_status: Option<fn(StatusCode) -> bool>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let use_cache = method == Method::GET;
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            retries: None,
            use_cache,
            cache_ttl: None,
            parse_json: false,
            accept_status: None,
        }
    }

    /// A cached GET whose body is parsed as JSON.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url).with_json(true)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_json(mut self, parse_json: bool) -> Self {
        self.parse_json = parse_json;
        self
    }

    pub fn with_accept_status(mut self, accept: fn(StatusCode) -> bool) -> Self {
        self.accept_status = Some(accept);
        self
    }

    fn is_cacheable(&self) -> bool {
        self.use_cache && self.method == Method::GET
    }

    fn accepts(&self, status: StatusCode) -> bool {
        match self.accept_status {
            Some(accept) => accept(status),
            None => status.is_success(),
        }
    }
}

/// Successful result of a fetch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub data: Value,
    pub from_cache: bool,
    /// Network attempts made; 0 for cache hits.
    pub attempt: u32,
    pub circuit_state: CircuitStatus,
    /// Upstream status; absent for cache hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub duration_ms: u64,
}

/// Outbound HTTP client with cache, circuit breaker and retries.
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    cache: Arc<TtlCache<Value>>,
    breaker: Arc<CircuitBreaker>,
    settings: ArcSwap<FetchSettings>,
}

impl ResilientFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<TtlCache<Value>>,
        breaker: Arc<CircuitBreaker>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            transport,
            cache,
            breaker,
            settings: ArcSwap::from_pointee(settings),
        }
    }

    pub fn settings(&self) -> Arc<FetchSettings> {
        self.settings.load_full()
    }

    pub fn update_settings(&self, settings: FetchSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn circuit_stats(&self) -> CircuitStats {
        self.breaker.stats()
    }

    /// Drop the cached GET response for `url`. Returns whether one existed.
    pub fn invalidate(&self, url: &str) -> Result<bool, FetchError> {
        let url = parse_target(url)?;
        Ok(self.cache.invalidate(&cache_key(Method::GET.as_str(), url.as_str())))
    }

    /// Drop every cached response. Returns how many were removed.
    pub fn invalidate_all(&self) -> usize {
        self.cache.clear()
    }

    /// Run one logical fetch.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome, FetchError> {
        let started = Instant::now();
        let url = parse_target(&request.url)?;
        let origin = origin_of(&url);
        let settings = self.settings.load_full();
        let key = cache_key(request.method.as_str(), url.as_str());

        if request.is_cacheable() {
            if let Some(data) = self.cache.get(&key) {
                return Ok(FetchOutcome {
                    data,
                    from_cache: true,
                    attempt: 0,
                    circuit_state: self.breaker.state(&origin),
                    status: None,
                    duration_ms: elapsed_ms(started),
                });
            }
        }

        self.breaker
            .check(&origin)
            .map_err(|rejection| FetchError::circuit_open(url.as_str(), &rejection))?;

        let policy = RetryPolicy::from_config(&settings.fetch)
            .with_retries(request.retries.unwrap_or(settings.fetch.retries));
        let timeout = request.timeout.unwrap_or_else(|| settings.fetch.timeout());
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self.attempt_once(&request, &url, timeout).await {
                Ok(response) if request.accepts(response.status) => {
                    let circuit_state = self.breaker.report_success(&origin);
                    let data = decode_body(&url, &response, request.parse_json)
                        .map_err(|e| e.with_attempts(attempt))?;
                    if request.is_cacheable() {
                        let ttl = request.cache_ttl.unwrap_or_else(|| settings.cache.default_ttl());
                        self.cache.set(key, data.clone(), ttl);
                    }
                    return Ok(FetchOutcome {
                        data,
                        from_cache: false,
                        attempt,
                        circuit_state,
                        status: Some(response.status.as_u16()),
                        duration_ms: elapsed_ms(started),
                    });
                }
                Ok(response) => FetchError::http(url.as_str(), response.status.as_u16(), &response.body),
                Err(error) => error,
            };
            let error = error.with_attempts(attempt);

            if error.counts_against_origin() {
                self.breaker.report_failure(&origin);
            } else if error.kind == ErrorKind::HttpError {
                self.breaker.report_success(&origin);
            } else {
                // Unclassified outcome: a half-open probe must not keep its slot.
                self.breaker.release_probe(&origin);
            }

            if !policy.should_retry(attempt, error.is_retryable()) {
                return Err(error);
            }

            // The failures so far may have tripped the breaker; stop early
            // and surface the real cause rather than a bare CIRCUIT_OPEN.
            if let Err(rejection) = self.breaker.check(&origin) {
                let mut error = error.with_detail("circuitState", json!(rejection.status));
                error.will_retry_at = Some(rejection.will_retry_at);
                return Err(error);
            }

            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
    }

    async fn attempt_once(
        &self,
        request: &FetchRequest,
        url: &Url,
        timeout: Duration,
    ) -> Result<TransportResponse, FetchError> {
        let cancel = CancellationToken::new();
        let outbound = TransportRequest {
            method: request.method.clone(),
            url: url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };

        match with_deadline(timeout, &cancel, self.transport.send(outbound, cancel.clone())).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(FetchError::from_transport(url.as_str(), e)),
            Err(deadline) => Err(FetchError::timeout(url.as_str(), deadline.0)),
        }
    }
}

/// Parse and check a target URL; only absolute http(s) URLs are accepted.
pub fn parse_target(raw: &str) -> Result<Url, FetchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FetchError::validation(raw, "url is required"));
    }
    let url = Url::parse(raw)
        .map_err(|e| FetchError::validation(raw, format!("invalid url: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(FetchError::validation(
            raw,
            format!("unsupported url '{raw}': scheme '{scheme}' must be http or https with a host"),
        )),
    }
}

fn decode_body(url: &Url, response: &TransportResponse, parse_json: bool) -> Result<Value, FetchError> {
    if parse_json {
        serde_json::from_slice(&response.body).map_err(|e| FetchError::parse(url.as_str(), &e))
    } else {
        Ok(Value::String(String::from_utf8_lossy(&response.body).into_owned()))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::fetch::transport::TransportError;
    use futures_util::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    enum Step {
        Respond(u16, &'static str),
        Fail(TransportError),
        Hang,
    }

    /// Replays a script of responses; the last step repeats.
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_step(&self) -> Step {
            let mut steps = self.steps.lock().unwrap();
            let step = if steps.len() > 1 { steps.pop_front() } else { None };
            match step {
                Some(step) => step,
                None => match steps.front() {
                    Some(Step::Respond(status, body)) => Step::Respond(*status, *body),
                    Some(Step::Fail(e)) => Step::Fail(e.clone()),
                    Some(Step::Hang) | None => Step::Hang,
                },
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            _request: TransportRequest,
            cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.next_step();
            Box::pin(async move {
                match step {
                    Step::Respond(status, body) => Ok(TransportResponse {
                        status: StatusCode::from_u16(status).unwrap(),
                        headers: HeaderMap::new(),
                        body: Bytes::from_static(body.as_bytes()),
                    }),
                    Step::Fail(e) => Err(e),
                    Step::Hang => {
                        cancel.cancelled().await;
                        Err(TransportError::Cancelled)
                    }
                }
            })
        }
    }

    fn fetcher_with(transport: Arc<ScriptedTransport>, threshold: u32) -> ResilientFetcher {
        let settings = FetchSettings {
            fetch: FetchConfig {
                timeout_ms: 1_000,
                retries: 2,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter: false,
                ..FetchConfig::default()
            },
            ..FetchSettings::default()
        };
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_ms: 30_000,
            half_open_max_probes: 1,
        }));
        ResilientFetcher::new(transport, Arc::new(TtlCache::new()), breaker, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond(500, "oops"),
            Step::Respond(500, "oops"),
            Step::Respond(200, r#"{"openapi":"3.0.0"}"#),
        ]);
        let fetcher = fetcher_with(transport.clone(), 5);

        let started = Instant::now();
        let outcome = fetcher
            .fetch(FetchRequest::get("http://svc-a/spec").with_retries(2))
            .await
            .unwrap();

        assert_eq!(outcome.attempt, 3);
        assert!(!outcome.from_cache);
        assert_eq!(outcome.status, Some(200));
        assert_eq!(outcome.data["openapi"], "3.0.0");
        assert_eq!(outcome.circuit_state, CircuitStatus::Closed);
        assert_eq!(transport.calls(), 3);
        // 100ms + 200ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_503_exhausts_attempts() {
        let transport = ScriptedTransport::new(vec![Step::Respond(503, "unavailable")]);
        let fetcher = fetcher_with(transport.clone(), 10);

        let err = fetcher
            .fetch(FetchRequest::get("http://svc-a/spec").with_retries(3))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::HttpError);
        assert_eq!(err.status, Some(503));
        assert_eq!(err.attempts, 4);
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Step::Respond(404, "not found")]);
        let fetcher = fetcher_with(transport.clone(), 1);

        let err = fetcher.fetch(FetchRequest::get("http://svc-a/missing")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::HttpError);
        assert_eq!(err.status, Some(404));
        assert_eq!(err.attempts, 1);
        assert_eq!(transport.calls(), 1);
        // Client errors do not count against the origin, even at threshold 1.
        assert!(fetcher.breaker().is_allowed("http://svc-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_classified_and_retried() {
        let transport = ScriptedTransport::new(vec![Step::Hang]);
        let fetcher = fetcher_with(transport.clone(), 10);

        let err = fetcher
            .fetch(FetchRequest::get("http://svc-a/slow").with_timeout(Duration::from_millis(50)).with_retries(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.attempts, 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_is_classified() {
        let transport = ScriptedTransport::new(vec![Step::Fail(TransportError::Connect(
            "connection refused".into(),
        ))]);
        let fetcher = fetcher_with(transport.clone(), 10);

        let err = fetcher.fetch(FetchRequest::get("http://svc-a/spec")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Step::Respond(200, "<html>not json</html>")]);
        let fetcher = fetcher_with(transport.clone(), 1);

        let err = fetcher.fetch(FetchRequest::get("http://svc-a/spec")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert_eq!(transport.calls(), 1);
        assert_eq!(fetcher.cache().len(), 0);
        assert!(fetcher.breaker().is_allowed("http://svc-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_network() {
        let transport = ScriptedTransport::new(vec![Step::Respond(503, "down")]);
        let fetcher = fetcher_with(transport.clone(), 3);

        // Three failed attempts trip the breaker.
        let first = fetcher.fetch(FetchRequest::get("http://svc-a/spec")).await.unwrap_err();
        assert_eq!(first.kind, ErrorKind::HttpError);
        assert_eq!(transport.calls(), 3);

        let err = fetcher.fetch(FetchRequest::get("http://svc-a/other")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert_eq!(err.attempts, 0);
        assert!(err.will_retry_at.unwrap() > crate::resilience::circuit_breaker::epoch_millis());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_stops_retries_mid_loop() {
        let transport = ScriptedTransport::new(vec![Step::Respond(502, "bad gateway")]);
        let fetcher = fetcher_with(transport.clone(), 2);

        let err = fetcher
            .fetch(FetchRequest::get("http://svc-a/spec").with_retries(5))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::HttpError);
        assert_eq!(err.attempts, 2);
        assert_eq!(err.details["circuitState"], "OPEN");
        assert!(err.will_retry_at.is_some());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_probe_frees_half_open_slot() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(TransportError::Other("redirect loop".into())),
            Step::Respond(200, r#"{"ok":true}"#),
        ]);
        let fetcher = fetcher_with(transport.clone(), 1);
        fetcher.breaker().report_failure("http://svc-a");
        tokio::time::advance(Duration::from_millis(30_001)).await;

        let err = fetcher.fetch(FetchRequest::get("http://svc-a/spec")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(fetcher.breaker().state("http://svc-a"), CircuitStatus::HalfOpen);

        let outcome = fetcher.fetch(FetchRequest::get("http://svc-a/spec")).await.unwrap();
        assert_eq!(outcome.circuit_state, CircuitStatus::Closed);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_bypasses_open_circuit() {
        let transport = ScriptedTransport::new(vec![Step::Respond(200, r#"{"v":1}"#)]);
        let fetcher = fetcher_with(transport.clone(), 1);

        let first = fetcher.fetch(FetchRequest::get("http://svc-a/spec")).await.unwrap();
        assert!(!first.from_cache);

        fetcher.breaker().report_failure("http://svc-a");
        assert!(!fetcher.breaker().is_allowed("http://svc-a"));

        let second = fetcher.fetch(FetchRequest::get("http://svc-a/spec")).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.attempt, 0);
        assert_eq!(second.data["v"], 1);
        assert_eq!(second.circuit_state, CircuitStatus::Open);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_and_opt_out() {
        let transport = ScriptedTransport::new(vec![Step::Respond(200, r#"{"v":1}"#)]);
        let fetcher = fetcher_with(transport.clone(), 5);
        let request = FetchRequest::get("http://svc-a/spec").with_cache_ttl(Duration::from_secs(5));

        fetcher.fetch(request.clone()).await.unwrap();
        assert!(fetcher.fetch(request.clone()).await.unwrap().from_cache);
        assert!(!fetcher.fetch(request.clone().with_cache(false)).await.unwrap().from_cache);
        assert_eq!(transport.calls(), 2);

        tokio::time::advance(Duration::from_millis(5_100)).await;
        assert!(!fetcher.fetch(request).await.unwrap().from_cache);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_is_never_cached() {
        let transport = ScriptedTransport::new(vec![Step::Respond(201, "created")]);
        let fetcher = fetcher_with(transport.clone(), 5);
        let request = FetchRequest::new(Method::POST, "http://svc-a/items")
            .with_cache(true)
            .with_body("{}");

        let outcome = fetcher.fetch(request.clone()).await.unwrap();
        assert_eq!(outcome.data, Value::String("created".into()));
        fetcher.fetch(request).await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert!(fetcher.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_accept_status() {
        let transport = ScriptedTransport::new(vec![Step::Respond(304, "")]);
        let fetcher = fetcher_with(transport.clone(), 5);
        let outcome = fetcher
            .fetch(
                FetchRequest::new(Method::GET, "http://svc-a/etag")
                    .with_accept_status(|s| s.is_success() || s == StatusCode::NOT_MODIFIED),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, Some(304));
    }

    #[tokio::test]
    async fn test_invalid_urls_are_validation_errors() {
        let transport = ScriptedTransport::new(vec![Step::Respond(200, "{}")]);
        let fetcher = fetcher_with(transport.clone(), 5);

        for bad in ["", "not a url", "ftp://files.example.com/spec.json", "file:///etc/passwd"] {
            let err = fetcher.fetch(FetchRequest::get(bad)).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::ValidationError, "url {bad:?}");
            assert_eq!(err.http_status(), 400);
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_normalizes_url() {
        let transport = ScriptedTransport::new(vec![Step::Respond(200, "{}")]);
        let fetcher = fetcher_with(transport, 5);
        fetcher.fetch(FetchRequest::get("http://svc-a")).await.unwrap();

        assert!(fetcher.invalidate("http://svc-a/").unwrap());
        assert!(!fetcher.invalidate("http://svc-a/").unwrap());
        assert!(fetcher.invalidate("nope").is_err());
    }
}
