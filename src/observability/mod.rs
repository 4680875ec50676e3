//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Route handlers, circuit breaker, cache:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Fetch results are logged by route handlers with request context;
//!   the breaker logs its own transitions
//! - Request ID flows through handler logs and response headers
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
