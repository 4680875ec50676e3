//! Resilient outbound fetch subsystem.
//!
//! # Data Flow
//! ```text
//! Route handler
//!     → client.rs (validate, cache, breaker admission, attempt loop)
//!         → transport.rs (one HTTP exchange, cancellable)
//!     → error.rs (every failure classified into one FetchError)
//! swagger.rs wraps client.rs with document defaults
//! ```
//!
//! # Responsibilities
//! - Keep slow-changing documents in the TTL cache
//! - Stop calling origins whose breaker is open
//! - Bound each attempt with a deadline and retry transient failures
//!
//! # Design Decisions
//! - The network sits behind the `Transport` trait so the attempt loop can
//!   be driven by scripted transports in tests
//! - Concurrent identical fetches are independent; no coalescing

pub mod client;
pub mod error;
pub mod swagger;
pub mod transport;

pub use client::{parse_target, FetchOutcome, FetchRequest, FetchSettings, ResilientFetcher};
pub use error::{ErrorKind, FetchError};
pub use swagger::SwaggerOptions;
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse};
