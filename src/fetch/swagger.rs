//! Swagger/OpenAPI document fetches.
//!
//! Thin wrapper over [`ResilientFetcher::fetch`] that pins the defaults for
//! JSON API documents: GET, `Accept: application/json`, JSON parsing and the
//! longer swagger cache TTL.

use reqwest::header::{HeaderValue, ACCEPT};
use std::time::Duration;

use crate::fetch::client::{FetchOutcome, FetchRequest, ResilientFetcher};
use crate::fetch::error::FetchError;

/// Per-call overrides for [`ResilientFetcher::fetch_swagger_spec`].
#[derive(Debug, Clone, Copy)]
pub struct SwaggerOptions {
    pub use_cache: bool,
    /// Per-attempt timeout; falls back to `swagger.timeout_ms`.
    pub timeout: Option<Duration>,
}

impl Default for SwaggerOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            timeout: None,
        }
    }
}

impl ResilientFetcher {
    /// Fetch and parse an OpenAPI/Swagger JSON document.
    pub async fn fetch_swagger_spec(
        &self,
        url: &str,
        options: SwaggerOptions,
    ) -> Result<FetchOutcome, FetchError> {
        let settings = self.settings();
        let request = FetchRequest::get(url)
            .with_header(ACCEPT, HeaderValue::from_static("application/json"))
            .with_cache(options.use_cache)
            .with_cache_ttl(Duration::from_millis(settings.swagger.cache_ttl_ms))
            .with_timeout(
                options
                    .timeout
                    .unwrap_or_else(|| Duration::from_millis(settings.swagger.timeout_ms)),
            );
        self.fetch(request).await
    }
}
