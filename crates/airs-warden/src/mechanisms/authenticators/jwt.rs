//! JWT Authenticator

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::endpoint::{Endpoint, HttpClient};
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::authenticators::extractors::{extract_token, TokenSource};
use crate::mechanisms::authenticators::{Authenticator, AUTHENTICATOR_JWT};
use crate::mechanisms::{parse_config, SubjectInfo};
use crate::oauth2::{
    permitted_algorithms, verify_claims, Assertions, JwksCache, MetadataEndpoint, ServerMetadata,
};
use crate::pipeline::{PipelineContext, Subject};

#[derive(Debug, Clone, Deserialize)]
struct JwtConfig {
    #[serde(default)]
    metadata_endpoint: Option<MetadataEndpoint>,

    #[serde(default)]
    jwks_endpoint: Option<Endpoint>,

    /// Trusted issuer; required with a static jwks_endpoint
    #[serde(default)]
    issuer: Option<String>,

    #[serde(default)]
    token_source: Option<Vec<TokenSource>>,

    #[serde(default)]
    assertions: Assertions,

    #[serde(default)]
    subject: SubjectInfo,

    #[serde(default)]
    cache_ttl: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct JwtOverride {
    #[serde(default)]
    token_source: Option<Vec<TokenSource>>,

    #[serde(default)]
    assertions: Option<Assertions>,

    #[serde(default)]
    subject: Option<SubjectInfo>,
}

/// Verifies bearer JWTs against the authorization server's JWKS
#[derive(Debug, Clone)]
pub struct JwtAuthenticator {
    id: String,
    metadata_endpoint: Option<MetadataEndpoint>,
    static_metadata: Option<ServerMetadata>,
    token_source: Option<Vec<TokenSource>>,
    assertions: Assertions,
    subject: SubjectInfo,
    jwks: Arc<JwksCache>,
    client: Arc<HttpClient>,
}

impl JwtAuthenticator {
    pub(crate) fn create(
        app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authenticator>> {
        let config: JwtConfig = parse_config(AUTHENTICATOR_JWT, id, config)?;

        let (metadata_endpoint, static_metadata) =
            match (config.metadata_endpoint, config.jwks_endpoint) {
                (Some(metadata), None) => {
                    metadata.endpoint.validate_templates()?;
                    (Some(metadata), None)
                }
                (None, Some(jwks_endpoint)) => {
                    jwks_endpoint.validate_templates()?;
                    let issuer = config.issuer.clone().ok_or_else(|| {
                        PipelineError::configuration(format!(
                            "jwt authenticator {id:?} requires an issuer when a static jwks_endpoint is used"
                        ))
                    })?;
                    let metadata = ServerMetadata {
                        issuer,
                        jwks_endpoint: Some(jwks_endpoint),
                        introspection_endpoint: None,
                        token_signing_algorithms: Vec::new(),
                    };
                    (None, Some(metadata))
                }
                _ => {
                    return Err(PipelineError::configuration(format!(
                        "jwt authenticator {id:?} requires exactly one of metadata_endpoint or jwks_endpoint"
                    )));
                }
            };

        let ttl = config.cache_ttl.unwrap_or(crate::oauth2::DEFAULT_JWKS_TTL);

        Ok(Arc::new(Self {
            id: id.to_string(),
            metadata_endpoint,
            static_metadata,
            token_source: config.token_source,
            assertions: config.assertions,
            subject: config.subject,
            jwks: Arc::new(JwksCache::new(ttl)),
            client: Arc::clone(app.http_client()),
        }))
    }

    async fn server_metadata(&self, ctx: &PipelineContext) -> PipelineResult<ServerMetadata> {
        match (&self.metadata_endpoint, &self.static_metadata) {
            (Some(endpoint), _) => {
                endpoint
                    .get(&self.client, ctx.cancellation(), &json!({}))
                    .await
            }
            (None, Some(metadata)) => Ok(metadata.clone()),
            (None, None) => Err(PipelineError::internal(
                "jwt authenticator has no metadata source",
            )),
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHENTICATOR_JWT
    }

    async fn authenticate(&self, ctx: &PipelineContext) -> PipelineResult<Subject> {
        let token = extract_token(self.token_source.as_deref(), ctx.request())?;

        let metadata = self.server_metadata(ctx).await?;

        let header = jsonwebtoken::decode_header(&token)
            .map_err(|e| PipelineError::authentication("failed to parse token").with_source(e))?;
        let kid = header
            .kid
            .ok_or_else(|| PipelineError::authentication("token has no kid in its header"))?;

        let permitted =
            permitted_algorithms(&metadata.token_signing_algorithms, &self.assertions)?;
        let token_algorithm = format!("{:?}", header.alg);
        if !permitted.contains(&token_algorithm) {
            return Err(PipelineError::authentication(format!(
                "token is signed with the disallowed algorithm {token_algorithm}"
            )));
        }

        let jwks_endpoint = metadata.jwks_endpoint.as_ref().ok_or_else(|| {
            PipelineError::configuration("server metadata provides no jwks_uri")
        })?;

        let key = self
            .jwks
            .key(&self.client, ctx.cancellation(), jwks_endpoint, &json!({}), &kid)
            .await?;

        let claims = verify_claims(
            &token,
            &key.to_decoding_key()?,
            header.alg,
            &metadata.issuer,
            &self.assertions,
        )?;

        debug!(authenticator = %self.id, "token verified");

        self.subject.create_subject(&claims)
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: JwtOverride = parse_config(AUTHENTICATOR_JWT, &self.id, Some(config))?;

        let mut instance = self.clone();
        if let Some(token_source) = overrides.token_source {
            instance.token_source = Some(token_source);
        }
        if let Some(assertions) = overrides.assertions {
            instance.assertions = assertions;
        }
        if let Some(subject) = overrides.subject {
            instance.subject = subject;
        }

        Ok(Arc::new(instance))
    }
}
