//! Resilient outbound-fetch proxy library.
//!
//! Cached, circuit-broken, retrying HTTP fetches of third-party Swagger
//! documents and arbitrary JSON APIs, exposed over a small `/proxy` API.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use fetch::{FetchError, FetchOutcome, FetchRequest, ResilientFetcher};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
