//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound attempt:
//!     → circuit_breaker.rs (admission check for the origin)
//!     → timeouts.rs (enforce per-attempt deadline, cancel on expiry)
//!     → On failure: retries.rs (retryable? attempts left?)
//!         → backoff.rs (exponential delay + jitter)
//!     → circuit_breaker.rs (report success / failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Client errors (4xx) are not retried and count as a live origin
//! - Circuit breaker prevents hammering an origin that is down

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitRejection, CircuitStats, CircuitStatus};
pub use retries::RetryPolicy;
