//! Resilient Proxy
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ axum router (/proxy/*) ──▶ ResilientFetcher ──▶ Upstream
//!                                          │   │   │
//!                                    TtlCache │  retry + backoff
//!                                             │  per-attempt deadline
//!                                  CircuitBreaker (per origin)
//!
//!   config file ──▶ ConfigWatcher ──▶ fetch settings / breaker thresholds
//!   metrics ──▶ Prometheus listener       logs ──▶ stdout
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use resilient_proxy::config::loader::load_config;
use resilient_proxy::config::watcher::ConfigWatcher;
use resilient_proxy::lifecycle::{wait_for_signal, Shutdown};
use resilient_proxy::observability::{logging, metrics};
use resilient_proxy::{HttpServer, ProxyConfig};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "resilient-proxy", version, about = "Resilient outbound-fetch proxy")]
struct Args {
    /// Path to a TOML config file; built-in defaults are used when omitted.
    #[arg(short, long, env = "RESILIENT_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilient-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        fetch_timeout_ms = config.fetch.timeout_ms,
        retries = config.fetch.retries,
        failure_threshold = config.circuit_breaker.failure_threshold,
        cooldown_ms = config.circuit_breaker.cooldown_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the life of the server.
    let (watcher_handle, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => (None, tokio::sync::mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let mut server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    tokio::select! {
        joined = &mut server_task => {
            joined??;
            return Ok(());
        }
        _ = wait_for_signal() => {}
    }

    shutdown.trigger();
    match tokio::time::timeout(SHUTDOWN_GRACE, server_task).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!("Connections still open after grace period, exiting"),
    }
    if !shutdown.drained(SHUTDOWN_GRACE).await {
        tracing::warn!("Background tasks still running after grace period");
    }
    drop(watcher_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}
