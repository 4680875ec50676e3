//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilient_proxy_requests_total` (counter): inbound requests by route, status
//! - `resilient_proxy_request_duration_seconds` (histogram): inbound latency by route
//! - `resilient_proxy_fetch_total` (counter): outbound fetch results by outcome
//! - `resilient_proxy_fetch_attempts` (histogram): attempts per network fetch
//! - `resilient_proxy_cache_lookups_total` (counter): cache lookups by result
//! - `resilient_proxy_cache_entries` (gauge): stored cache entries
//! - `resilient_proxy_circuit_transitions_total` (counter): breaker transitions by new state
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the recorder, so
//!   library code and tests can call these freely
//! - Origins are not used as labels to keep cardinality bounded

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record an inbound request on one of the proxy routes.
pub fn record_request(route: &'static str, status: u16, start: Instant) {
    counter!("resilient_proxy_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    histogram!("resilient_proxy_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

/// Record the final outcome of an outbound fetch.
pub fn record_fetch(outcome: &'static str, attempts: u32) {
    counter!("resilient_proxy_fetch_total", "outcome" => outcome).increment(1);
    if attempts > 0 {
        histogram!("resilient_proxy_fetch_attempts").record(attempts as f64);
    }
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("resilient_proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(size: usize) {
    gauge!("resilient_proxy_cache_entries").set(size as f64);
}

pub fn record_circuit_transition(state: &'static str) {
    counter!("resilient_proxy_circuit_transitions_total", "state" => state).increment(1);
}
