//! Response caching.
//!
//! # Data Flow
//! ```text
//! Resilient fetch (GET, cache enabled)
//!     → cache key "GET:<url>"
//!     → ttl.rs lookup (hit: return, miss: fetch)
//!     → on success: store parsed body with TTL
//! ```
//!
//! # Design Decisions
//! - Process memory only; nothing survives a restart
//! - Lazy expiry on read plus a periodic sweep
//! - No coalescing of concurrent misses for the same key

pub mod ttl;

pub use ttl::{CacheStats, TtlCache};

/// Cache key for a request signature.
pub fn cache_key(method: &str, url: &str) -> String {
    format!("{}:{}", method.to_ascii_uppercase(), url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("get", "http://x/spec"), "GET:http://x/spec");
    }
}
