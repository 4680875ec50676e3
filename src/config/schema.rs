//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the resilient proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Server-side timeouts.
    pub timeouts: TimeoutConfig,

    /// Outbound fetch defaults (timeout, retries, backoff).
    pub fetch: FetchConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Per-origin circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Defaults for Swagger/OpenAPI document fetches.
    pub swagger: SwaggerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Request limits.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hard ceiling for a whole inbound request in seconds.
    /// Must cover `fetch.timeout_ms * (retries + 1)` plus backoff.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 120 }
    }
}

/// Outbound fetch defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// Additional attempts after the first one.
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each backoff delay.
    pub jitter: bool,

    /// User-Agent sent on outbound requests.
    pub user_agent: String,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: true,
            user_agent: concat!("resilient-proxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when a cacheable call does not specify one, in milliseconds.
    pub default_ttl_ms: u64,

    /// Interval of the background sweep of expired entries (0 disables it).
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 60_000,
            sweep_interval_secs: 60,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip an origin's breaker.
    pub failure_threshold: u32,

    /// Time an origin stays open before a probe is admitted, in milliseconds.
    pub cooldown_ms: u64,

    /// Probes admitted concurrently while half-open.
    pub half_open_max_probes: u32,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            half_open_max_probes: 1,
        }
    }
}

/// Swagger document fetch defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwaggerConfig {
    /// How long a fetched document stays cached, in milliseconds.
    pub cache_ttl_ms: u64,

    /// Per-attempt timeout for document fetches, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SwaggerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5 * 60 * 1000,
            timeout_ms: 15_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum inbound body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.fetch.retries, 2);
        assert_eq!(config.swagger.cache_ttl_ms, 300_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_partial_sections() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [fetch]
            retries = 4

            [circuit_breaker]
            cooldown_ms = 1000

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.retries, 4);
        assert_eq!(config.fetch.timeout_ms, 30_000);
        assert_eq!(config.circuit_breaker.cooldown(), Duration::from_secs(1));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
