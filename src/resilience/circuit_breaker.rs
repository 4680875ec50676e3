//! Per-origin circuit breaker.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: origin assumed down, requests fail fast
//! - Half-Open: cooldown elapsed, a bounded number of probes pass
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first admission check after cooldown
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - Keyed by origin (scheme+host+port), not by URL
//! - Fail fast in Open state (no network I/O)
//! - Every read-modify-write runs under the map's per-key lock
//! - A probe slot older than the cooldown is treated as abandoned, so a
//!   caller that vanished mid-probe cannot wedge the origin in Half-Open

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use url::Url;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker status for one origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "CLOSED",
            CircuitStatus::Open => "OPEN",
            CircuitStatus::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an origin's breaker refuses a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitRejection {
    pub origin: String,
    pub status: CircuitStatus,
    /// Wall-clock time (ms since epoch) when a probe will next be admitted.
    pub will_retry_at: u64,
}

#[derive(Debug, Clone)]
struct OriginCircuit {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    last_probe_at: Option<Instant>,
}

impl OriginCircuit {
    fn closed() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probes_in_flight: 0,
            last_probe_at: None,
        }
    }

    fn trip(&mut self, now: Instant) {
        self.status = CircuitStatus::Open;
        self.opened_at = Some(now);
        self.probes_in_flight = 0;
        self.last_probe_at = None;
    }
}

/// Point-in-time view of one origin, for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginSnapshot {
    pub origin: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_retry_at: Option<u64>,
}

/// Counts of origins per state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub open: usize,
    pub closed: usize,
    pub half_open: usize,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub origins: Vec<OriginSnapshot>,
}

/// Tracks breaker state for every origin the process has talked to.
pub struct CircuitBreaker {
    circuits: DashMap<String, OriginCircuit>,
    config: ArcSwap<CircuitBreakerConfig>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Replace thresholds; existing per-origin state is kept.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.load_full()
    }

    /// Admission check before a network attempt.
    ///
    /// Returns the state the request is admitted under (`HalfOpen` means the
    /// caller is a probe), or the rejection with the next probe time.
    pub fn check(&self, origin: &str) -> Result<CircuitStatus, CircuitRejection> {
        let config = self.config.load();
        let cooldown = config.cooldown();
        let now = Instant::now();

        let mut circuit = self
            .circuits
            .entry(origin.to_string())
            .or_insert_with(OriginCircuit::closed);

        let status = circuit.status;
        match status {
            CircuitStatus::Closed => Ok(CircuitStatus::Closed),
            CircuitStatus::Open => {
                let opened_at = circuit.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= cooldown {
                    circuit.status = CircuitStatus::HalfOpen;
                    circuit.probes_in_flight = 1;
                    circuit.last_probe_at = Some(now);
                    drop(circuit);
                    tracing::info!(origin = %origin, "Circuit half-open, admitting probe");
                    metrics::record_circuit_transition(CircuitStatus::HalfOpen.as_str());
                    Ok(CircuitStatus::HalfOpen)
                } else {
                    Err(CircuitRejection {
                        origin: origin.to_string(),
                        status: CircuitStatus::Open,
                        will_retry_at: wall_clock_after(
                            cooldown.saturating_sub(now.saturating_duration_since(opened_at)),
                        ),
                    })
                }
            }
            CircuitStatus::HalfOpen => {
                let abandoned = circuit
                    .last_probe_at
                    .map(|at| now.saturating_duration_since(at) >= cooldown)
                    .unwrap_or(true);
                if abandoned {
                    circuit.probes_in_flight = 0;
                }
                if circuit.probes_in_flight < config.half_open_max_probes {
                    circuit.probes_in_flight += 1;
                    circuit.last_probe_at = Some(now);
                    Ok(CircuitStatus::HalfOpen)
                } else {
                    let since_probe = circuit
                        .last_probe_at
                        .map(|at| now.saturating_duration_since(at))
                        .unwrap_or_default();
                    Err(CircuitRejection {
                        origin: origin.to_string(),
                        status: CircuitStatus::HalfOpen,
                        will_retry_at: wall_clock_after(cooldown.saturating_sub(since_probe)),
                    })
                }
            }
        }
    }

    /// Boolean form of [`check`](Self::check).
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.check(origin).is_ok()
    }

    /// Record a successful attempt. Returns the resulting status.
    pub fn report_success(&self, origin: &str) -> CircuitStatus {
        let mut circuit = self
            .circuits
            .entry(origin.to_string())
            .or_insert_with(OriginCircuit::closed);

        let previous = circuit.status;
        match previous {
            CircuitStatus::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitStatus::HalfOpen => {
                *circuit = OriginCircuit::closed();
            }
            // A late success from a request admitted before the trip does not
            // close the breaker; only a probe can.
            CircuitStatus::Open => {}
        }
        let status = circuit.status;
        drop(circuit);

        if previous == CircuitStatus::HalfOpen {
            tracing::info!(origin = %origin, "Circuit closed after successful probe");
            metrics::record_circuit_transition(CircuitStatus::Closed.as_str());
        }
        status
    }

    /// Record a failed attempt. Returns the resulting status.
    pub fn report_failure(&self, origin: &str) -> CircuitStatus {
        let config = self.config.load();
        let now = Instant::now();

        let mut circuit = self
            .circuits
            .entry(origin.to_string())
            .or_insert_with(OriginCircuit::closed);

        let previous = circuit.status;
        match previous {
            CircuitStatus::Closed => {
                circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                if circuit.consecutive_failures >= config.failure_threshold {
                    circuit.trip(now);
                }
            }
            CircuitStatus::HalfOpen => circuit.trip(now),
            CircuitStatus::Open => {}
        }
        let status = circuit.status;
        let failures = circuit.consecutive_failures;
        drop(circuit);

        if previous != CircuitStatus::Open && status == CircuitStatus::Open {
            tracing::warn!(
                origin = %origin,
                consecutive_failures = failures,
                cooldown_ms = config.cooldown_ms,
                probe_failed = previous == CircuitStatus::HalfOpen,
                "Circuit opened"
            );
            metrics::record_circuit_transition(CircuitStatus::Open.as_str());
        }
        status
    }

    /// Give back a half-open probe slot whose attempt said nothing about
    /// the origin's health. No-op in any other state.
    pub fn release_probe(&self, origin: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(origin) {
            if circuit.status == CircuitStatus::HalfOpen {
                circuit.probes_in_flight = circuit.probes_in_flight.saturating_sub(1);
            }
        }
    }

    /// Force one origin, or every origin, back to Closed.
    /// Returns the number of origins reset.
    pub fn reset(&self, origin: Option<&str>) -> usize {
        let count = match origin {
            Some(origin) => match self.circuits.get_mut(origin) {
                Some(mut circuit) => {
                    *circuit = OriginCircuit::closed();
                    1
                }
                None => 0,
            },
            None => {
                let count = self.circuits.len();
                self.circuits.clear();
                count
            }
        };
        tracing::info!(origin = origin.unwrap_or("*"), count, "Circuit breaker reset");
        count
    }

    /// Current status without side effects. Unknown origins are Closed.
    pub fn state(&self, origin: &str) -> CircuitStatus {
        self.circuits
            .get(origin)
            .map(|c| c.status)
            .unwrap_or(CircuitStatus::Closed)
    }

    pub fn stats(&self) -> CircuitStats {
        let config = self.config.load();
        let cooldown = config.cooldown();
        let now = Instant::now();

        let mut stats = CircuitStats {
            open: 0,
            closed: 0,
            half_open: 0,
            failure_threshold: config.failure_threshold,
            cooldown_ms: config.cooldown_ms,
            origins: Vec::with_capacity(self.circuits.len()),
        };

        for entry in self.circuits.iter() {
            let circuit = entry.value();
            let will_retry_at = match (circuit.status, circuit.opened_at) {
                (CircuitStatus::Open, Some(opened_at)) => Some(wall_clock_after(
                    cooldown.saturating_sub(now.saturating_duration_since(opened_at)),
                )),
                _ => None,
            };
            match circuit.status {
                CircuitStatus::Open => stats.open += 1,
                CircuitStatus::Closed => stats.closed += 1,
                CircuitStatus::HalfOpen => stats.half_open += 1,
            }
            stats.origins.push(OriginSnapshot {
                origin: entry.key().clone(),
                status: circuit.status,
                consecutive_failures: circuit.consecutive_failures,
                will_retry_at,
            });
        }
        stats.origins.sort_by(|a, b| a.origin.cmp(&b.origin));
        stats
    }
}

/// Scheme, host and port of a URL, e.g. `http://svc-a:8080`.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn wall_clock_after(remaining: Duration) -> u64 {
    epoch_millis() + remaining.as_millis() as u64
}
