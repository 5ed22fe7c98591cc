//! Injected HTTP Client Collaborator
//!
//! Wraps the reqwest client together with the process-wide HTTP response
//! cache and the OAuth2 client-credentials token cache. DNS and TLS are the
//! client's concern; the pipeline never performs them itself.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use reqwest::Client;

// Layer 3: Internal module imports
use crate::cache::TtlCache;
use crate::endpoint::Response;
use crate::error::{PipelineError, PipelineResult};

/// Default connect timeout for upstream calls
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client with the process-wide caches attached
pub struct HttpClient {
    inner: Client,
    response_cache: TtlCache<Response>,
    token_cache: TtlCache<String>,
}

impl HttpClient {
    pub fn new() -> PipelineResult<Self> {
        let inner = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                PipelineError::configuration("failed to create HTTP client").with_source(e)
            })?;

        Ok(Self {
            inner,
            response_cache: TtlCache::default(),
            token_cache: TtlCache::default(),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Cache for HTTP responses of cache-enabled endpoints
    pub fn response_cache(&self) -> &TtlCache<Response> {
        &self.response_cache
    }

    /// Cache for OAuth2 client-credentials access tokens
    pub fn token_cache(&self) -> &TtlCache<String> {
        &self.token_cache
    }
}
