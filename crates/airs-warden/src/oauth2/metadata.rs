//! Authorization Server Metadata Resolution (RFC 8414)

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::{Position, Url};

// Layer 3: Internal module imports
use crate::endpoint::{AuthStrategy, Endpoint, HttpCache, HttpClient, Retry};
use crate::error::{PipelineError, PipelineResult};
use crate::template::Template;

/// JSON field names of the endpoints resolved from the metadata document,
/// used as keys for per-endpoint settings
pub const JWKS_URI_FIELD: &str = "jwks_uri";
pub const INTROSPECTION_ENDPOINT_FIELD: &str = "introspection_endpoint";

/// Well-known path components per RFC 8414 and OpenID Connect Discovery
const WELL_KNOWN_MARKERS: [&str; 2] = [
    "/.well-known/oauth-authorization-server",
    "/.well-known/openid-configuration",
];

/// Settings merged into an endpoint resolved from a metadata document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEndpointSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Retry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_cache: Option<HttpCache>,

    #[serde(default, rename = "auth", skip_serializing_if = "Option::is_none")]
    pub auth_strategy: Option<AuthStrategy>,
}

/// The resolved authorization server metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMetadata {
    pub issuer: String,
    pub jwks_endpoint: Option<Endpoint>,
    pub introspection_endpoint: Option<Endpoint>,
    pub token_signing_algorithms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    issuer: String,

    #[serde(default)]
    jwks_uri: Option<String>,

    #[serde(default)]
    introspection_endpoint: Option<String>,

    #[serde(default)]
    token_endpoint_auth_signing_alg_values_supported: Vec<String>,
}

/// Endpoint serving an authorization server metadata document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEndpoint {
    #[serde(flatten)]
    pub endpoint: Endpoint,

    #[serde(default)]
    pub resolved_endpoints: HashMap<String, ResolvedEndpointSettings>,
}

impl MetadataEndpoint {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            resolved_endpoints: HashMap::new(),
        }
    }

    /// Fetch and validate the metadata document
    pub async fn get(
        &self,
        client: &HttpClient,
        cancel: &CancellationToken,
        args: &Value,
    ) -> PipelineResult<ServerMetadata> {
        let mut endpoint = self.endpoint.clone();
        endpoint.method = "GET".to_string();
        endpoint
            .headers
            .insert("Accept".to_string(), "application/json".to_string());

        let requested_url = Template::new(&endpoint.url)
            .and_then(|template| template.render(args))
            .map_err(|e| {
                PipelineError::internal(format!(
                    "creating oauth2 server metadata request to {:?} failed",
                    self.endpoint.url
                ))
                .with_source(e)
            })?;
        endpoint.url = requested_url.clone();

        debug!(url = %requested_url, "fetching oauth2 server metadata");

        let response = endpoint
            .call(client, cancel, args, None)
            .await?
            .ensure_success()?;

        let document: MetadataDocument = serde_json::from_slice(&response.body).map_err(|e| {
            PipelineError::internal("failed to unmarshal oauth2 server metadata").with_source(e)
        })?;

        self.verify_issuer(&requested_url, &document.issuer)?;

        let jwks_endpoint = document
            .jwks_uri
            .as_deref()
            .map(|url| {
                self.resolve_endpoint(
                    JWKS_URI_FIELD,
                    url,
                    "GET",
                    &[("Accept", "application/json")],
                )
            })
            .transpose()?;

        let introspection_endpoint = document
            .introspection_endpoint
            .as_deref()
            .map(|url| {
                self.resolve_endpoint(
                    INTROSPECTION_ENDPOINT_FIELD,
                    url,
                    "POST",
                    &[
                        ("Content-Type", "application/x-www-form-urlencoded"),
                        ("Accept", "application/json"),
                    ],
                )
            })
            .transpose()?;

        Ok(ServerMetadata {
            issuer: document.issuer,
            jwks_endpoint,
            introspection_endpoint,
            token_signing_algorithms: document.token_endpoint_auth_signing_alg_values_supported,
        })
    }

    /// RFC 8414 §3.3: the issuer reported by the document must be consistent
    /// with the URL the document was fetched from
    fn verify_issuer(&self, requested_url: &str, issuer: &str) -> PipelineResult<()> {
        let expected = expected_issuer(requested_url)?;
        if trim_slash(issuer) != trim_slash(&expected) {
            return Err(PipelineError::configuration(format!(
                "issuer {issuer:?} reported by the metadata document does not match the expected issuer {expected:?}"
            )));
        }
        Ok(())
    }

    fn resolve_endpoint(
        &self,
        field: &str,
        url: &str,
        method: &str,
        headers: &[(&str, &str)],
    ) -> PipelineResult<Endpoint> {
        if Template::has_markers(url) {
            return Err(PipelineError::configuration(format!(
                "{field} contains a template"
            )));
        }

        let mut endpoint = Endpoint::new(url);
        endpoint.method = method.to_string();
        for (name, value) in headers {
            endpoint
                .headers
                .insert((*name).to_string(), (*value).to_string());
        }

        if let Some(settings) = self.resolved_endpoints.get(field) {
            endpoint.retry = settings.retry.clone();
            endpoint.http_cache = settings.http_cache.clone();
            endpoint.auth_strategy = settings.auth_strategy.clone();
        }

        Ok(endpoint)
    }
}

/// Derive the issuer implied by a metadata document URL by removing the
/// well-known path component (RFC 8414 §3)
fn expected_issuer(metadata_url: &str) -> PipelineResult<String> {
    let url = Url::parse(metadata_url).map_err(|e| {
        PipelineError::configuration(format!("invalid metadata URL {metadata_url:?}"))
            .with_source(e)
    })?;

    let origin = &url[..Position::BeforePath];
    let path = url.path();

    for marker in WELL_KNOWN_MARKERS {
        if let Some(pos) = path.find(marker) {
            let prefix = &path[..pos];
            let suffix = &path[pos + marker.len()..];
            return Ok(format!("{origin}{prefix}{suffix}"));
        }
    }

    Ok(format!("{origin}{path}"))
}

fn trim_slash(s: &str) -> &str {
    s.trim_end_matches('/')
}
