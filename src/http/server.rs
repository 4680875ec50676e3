//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the fetch core (transport, cache, circuit breaker) from config
//! - Create the Axum router with the `/proxy` handlers
//! - Wire up middleware (tracing, limits, timeout, request ID)
//! - Apply hot-reloaded config to the fetch core
//! - Sweep expired cache entries in the background
//! - Serve until shutdown is signalled

use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::cache::TtlCache;
use crate::config::ProxyConfig;
use crate::fetch::{FetchSettings, ReqwestTransport, ResilientFetcher, Transport, TransportError};
use crate::http::handlers;
use crate::http::request::{request_id, UuidRequestId};
use crate::observability::metrics;
use crate::resilience::CircuitBreaker;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<ResilientFetcher>,
}

/// HTTP server for the resilient proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    fetcher: Arc<ResilientFetcher>,
}

impl HttpServer {
    /// Create a server that calls upstreams through `reqwest`.
    pub fn new(config: ProxyConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(&config.fetch.user_agent)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a server on top of an arbitrary transport.
    pub fn with_transport(config: ProxyConfig, transport: Arc<dyn Transport>) -> Self {
        let fetcher = Arc::new(ResilientFetcher::new(
            transport,
            Arc::new(TtlCache::new()),
            Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            FetchSettings::from_config(&config),
        ));

        let state = AppState {
            fetcher: fetcher.clone(),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            fetcher,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id(request.headers()),
            )
        });

        Router::new()
            .route("/proxy/swagger", get(handlers::get_swagger))
            .route("/proxy/swagger/invalidate", post(handlers::invalidate_swagger))
            .route("/proxy/swagger/stats", get(handlers::swagger_stats))
            .route("/proxy/circuit/reset", post(handlers::reset_circuit))
            .route("/proxy/execute", post(handlers::execute))
            .route("/proxy/health", get(handlers::health))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                    .layer(trace)
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// The configured router, for serving or for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn fetcher(&self) -> &Arc<ResilientFetcher> {
        &self.fetcher
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// New configs arriving on `config_updates` are applied to the fetch
    /// core; listener and middleware settings keep their startup values.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(apply_config_updates(
            self.fetcher.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        let sweep_every = self.config.cache.sweep_interval_secs;
        if sweep_every > 0 {
            tokio::spawn(sweep_cache(
                self.fetcher.cache().clone(),
                Duration::from_secs(sweep_every),
                shutdown.resubscribe(),
            ));
        }

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Push reloaded fetch defaults and breaker thresholds into the fetch core.
async fn apply_config_updates(
    fetcher: Arc<ResilientFetcher>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            update = updates.recv() => {
                let Some(config) = update else { break };
                fetcher.update_settings(FetchSettings::from_config(&config));
                fetcher.breaker().update_config(config.circuit_breaker.clone());
                tracing::info!(
                    timeout_ms = config.fetch.timeout_ms,
                    retries = config.fetch.retries,
                    failure_threshold = config.circuit_breaker.failure_threshold,
                    cooldown_ms = config.circuit_breaker.cooldown_ms,
                    "Applied reloaded configuration"
                );
            }
        }
    }
}

/// Periodically drop expired cache entries.
async fn sweep_cache(
    cache: Arc<TtlCache<serde_json::Value>>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                let removed = cache.purge_expired();
                metrics::record_cache_size(cache.len());
                if removed > 0 {
                    tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                }
            }
        }
    }
}
