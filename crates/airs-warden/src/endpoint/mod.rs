//! Endpoint Caller
//!
//! Endpoints describe outgoing HTTP calls with templated URL, headers and
//! body, configurable retry behavior, HTTP response caching and a pluggable
//! authentication strategy. Mechanisms hold endpoints as part of their
//! configuration and invoke them with the pipeline's template values.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::time::Duration;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};
use crate::template::Template;

mod auth_strategy;
mod client;

pub use auth_strategy::{ApiKeyPlacement, AuthStrategy};
pub use client::HttpClient;

/// Initial backoff delay between retries
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

fn default_method() -> String {
    "GET".to_string()
}

/// Retry configuration for an endpoint
///
/// Retries apply to transport errors and 5xx responses only; delays grow
/// exponentially up to `max_delay` until `give_up_after` has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retry {
    pub give_up_after: Duration,
    pub max_delay: Duration,
}

/// HTTP response cache configuration for an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCache {
    pub enabled: bool,
    #[serde(default)]
    pub default_ttl: Option<Duration>,
}

/// An outgoing HTTP call description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Retry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_cache: Option<HttpCache>,

    #[serde(default, rename = "auth", skip_serializing_if = "Option::is_none")]
    pub auth_strategy: Option<AuthStrategy>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: HashMap::new(),
            body: None,
            retry: None,
            http_cache: None,
            auth_strategy: None,
        }
    }

    /// Compile all templates to surface parse errors at load time
    pub fn validate_templates(&self) -> PipelineResult<()> {
        Template::new(&self.url)
            .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        for value in self.headers.values() {
            Template::new(value)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        }
        if let Some(body) = &self.body {
            Template::new(body)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        }
        Ok(())
    }

    /// Issue the call with the given template values
    ///
    /// A body override takes precedence over the configured body template.
    pub async fn call(
        &self,
        client: &HttpClient,
        cancel: &CancellationToken,
        values: &Value,
        body_override: Option<String>,
    ) -> PipelineResult<Response> {
        let url = self.render(&self.url, values)?;

        let mut headers = HashMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            headers.insert(name.clone(), self.render(value, values)?);
        }

        let body = match body_override {
            Some(body) => Some(body),
            None => self
                .body
                .as_ref()
                .map(|body| self.render(body, values))
                .transpose()?,
        };

        let cache_enabled = self
            .http_cache
            .as_ref()
            .map(|cache| cache.enabled)
            .unwrap_or(false);

        if !cache_enabled {
            return self.send(client, cancel, &url, &headers, body).await;
        }

        let key = self.cache_key(&url, &headers);
        let default_ttl = self
            .http_cache
            .as_ref()
            .and_then(|cache| cache.default_ttl);

        client
            .response_cache()
            .get_or_compute(&key, || async {
                let response = self.send(client, cancel, &url, &headers, body).await?;
                let ttl = if response.is_success() {
                    response.cache_max_age().or(default_ttl)
                } else {
                    None
                };
                Ok((response, ttl))
            })
            .await
    }

    fn render(&self, source: &str, values: &Value) -> PipelineResult<String> {
        Template::new(source)
            .and_then(|template| template.render(values))
            .map_err(|e| {
                PipelineError::internal(format!("creating request to {:?} failed", self.url))
                    .with_source(e)
            })
    }

    async fn send(
        &self,
        client: &HttpClient,
        cancel: &CancellationToken,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<String>,
    ) -> PipelineResult<Response> {
        let method = reqwest::Method::from_bytes(self.method.as_bytes()).map_err(|e| {
            PipelineError::configuration(format!("invalid endpoint method {:?}", self.method))
                .with_source(e)
        })?;

        let mut builder = client.inner().request(method, url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        if let Some(strategy) = &self.auth_strategy {
            builder = strategy.apply(client, cancel, builder).await?;
        }

        let request = builder.build().map_err(|e| {
            PipelineError::internal(format!("creating request to {url:?} failed")).with_source(e)
        })?;

        let deadline = self.retry.as_ref().map(|r| Instant::now() + r.give_up_after);
        let mut delay = INITIAL_BACKOFF;

        loop {
            let attempt = request.try_clone().ok_or_else(|| {
                PipelineError::internal("request body is not replayable")
            })?;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PipelineError::communication("request cancelled"));
                }
                result = client.inner().execute(attempt) => result,
            };

            let retry_possible = deadline
                .map(|deadline| Instant::now() + delay < deadline)
                .unwrap_or(false);

            match result {
                Ok(response) if response.status().is_server_error() && retry_possible => {
                    warn!(url, status = %response.status(), "retrying after server error");
                }
                Ok(response) => return Response::read(cancel, response).await,
                Err(error) if retry_possible => {
                    warn!(url, %error, "retrying after transport error");
                }
                Err(error) => {
                    return Err(PipelineError::communication(format!(
                        "request to {url:?} failed"
                    ))
                    .with_source(error));
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PipelineError::communication("request cancelled"));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            delay = self
                .retry
                .as_ref()
                .map(|r| std::cmp::min(delay * 2, r.max_delay))
                .unwrap_or(delay);
        }
    }

    fn cache_key(&self, url: &str, headers: &HashMap<String, String>) -> String {
        let mut significant: Vec<(&String, &String)> = headers.iter().collect();
        significant.sort();

        let mut digest = Sha256::new();
        digest.update(self.method.as_bytes());
        digest.update(url.as_bytes());
        for (name, value) in significant {
            digest.update(name.as_bytes());
            digest.update(value.as_bytes());
        }

        format!("http:{:x}", digest.finalize())
    }
}

/// Response of an endpoint call
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    async fn read(cancel: &CancellationToken, response: reqwest::Response) -> PipelineResult<Self> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PipelineError::communication("request cancelled"));
            }
            body = response.bytes() => body.map_err(|e| {
                PipelineError::communication("failed to read response body").with_source(e)
            })?,
        };

        debug!(status, len = body.len(), "endpoint responded");

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with a communication error on non-2xx responses
    pub fn ensure_success(self) -> PipelineResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PipelineError::communication(format!(
                "unexpected response code: {}",
                self.status
            )))
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the response declares a JSON content type
    pub fn is_json(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }

    /// Decode the body as JSON
    pub fn json(&self) -> PipelineResult<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| PipelineError::internal("failed to unmarshal response").with_source(e))
    }

    fn cache_max_age(&self) -> Option<Duration> {
        let cache_control = self.header(CACHE_CONTROL.as_str())?;
        for directive in cache_control.split(',') {
            let mut parts = directive.trim().splitn(2, '=');
            if parts.next() == Some("max-age") {
                if let Some(Ok(secs)) = parts.next().map(str::parse::<u64>) {
                    return Some(Duration::from_secs(secs));
                }
            }
        }
        None
    }
}
