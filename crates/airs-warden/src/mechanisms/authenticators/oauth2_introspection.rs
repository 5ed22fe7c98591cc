//! OAuth2 Token Introspection Authenticator (RFC 7662)

// Layer 1: Standard library imports
use std::sync::Arc;

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
use crate::mechanisms::authenticators::{Authenticator, AUTHENTICATOR_OAUTH2_INTROSPECTION};
use crate::mechanisms::{parse_config, SubjectInfo};
use crate::oauth2::{
    assert_scopes, extract_scopes, Assertions, IntrospectionResponse, MetadataEndpoint,
};
use crate::pipeline::{PipelineContext, Subject};

#[derive(Debug, Clone, Deserialize)]
struct IntrospectionConfig {
    #[serde(default)]
    introspection_endpoint: Option<Endpoint>,

    #[serde(default)]
    metadata_endpoint: Option<MetadataEndpoint>,

    /// Trusted issuer; used with a static introspection_endpoint
    #[serde(default)]
    issuer: Option<String>,

    #[serde(default)]
    token_source: Option<Vec<TokenSource>>,

    #[serde(default)]
    assertions: Assertions,

    #[serde(default)]
    subject: SubjectInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntrospectionOverride {
    #[serde(default)]
    token_source: Option<Vec<TokenSource>>,

    #[serde(default)]
    assertions: Option<Assertions>,

    #[serde(default)]
    subject: Option<SubjectInfo>,
}

/// Validates opaque tokens by posting them to an introspection endpoint
#[derive(Debug, Clone)]
pub struct OAuth2IntrospectionAuthenticator {
    id: String,
    introspection_endpoint: Option<Endpoint>,
    metadata_endpoint: Option<MetadataEndpoint>,
    issuer: Option<String>,
    token_source: Option<Vec<TokenSource>>,
    assertions: Assertions,
    subject: SubjectInfo,
    client: Arc<HttpClient>,
}

impl OAuth2IntrospectionAuthenticator {
    pub(crate) fn create(
        app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authenticator>> {
        let config: IntrospectionConfig =
            parse_config(AUTHENTICATOR_OAUTH2_INTROSPECTION, id, config)?;

        match (&config.introspection_endpoint, &config.metadata_endpoint) {
            (Some(endpoint), None) => endpoint.validate_templates()?,
            (None, Some(metadata)) => metadata.endpoint.validate_templates()?,
            _ => {
                return Err(PipelineError::configuration(format!(
                    "oauth2_introspection authenticator {id:?} requires exactly one of introspection_endpoint or metadata_endpoint"
                )));
            }
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            introspection_endpoint: config.introspection_endpoint,
            metadata_endpoint: config.metadata_endpoint,
            issuer: config.issuer,
            token_source: config.token_source,
            assertions: config.assertions,
            subject: config.subject,
            client: Arc::clone(app.http_client()),
        }))
    }

    async fn resolve_endpoint(
        &self,
        ctx: &PipelineContext,
    ) -> PipelineResult<(Endpoint, Option<String>)> {
        if let Some(metadata_endpoint) = &self.metadata_endpoint {
            let metadata = metadata_endpoint
                .get(&self.client, ctx.cancellation(), &json!({}))
                .await?;
            let endpoint = metadata.introspection_endpoint.ok_or_else(|| {
                PipelineError::configuration(
                    "server metadata provides no introspection_endpoint",
                )
            })?;
            return Ok((endpoint, Some(metadata.issuer)));
        }

        let endpoint = self.introspection_endpoint.clone().ok_or_else(|| {
            PipelineError::internal("oauth2_introspection authenticator has no endpoint")
        })?;
        Ok((endpoint, self.issuer.clone()))
    }
}

#[async_trait]
impl Authenticator for OAuth2IntrospectionAuthenticator {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHENTICATOR_OAUTH2_INTROSPECTION
    }

    async fn authenticate(&self, ctx: &PipelineContext) -> PipelineResult<Subject> {
        let token = extract_token(self.token_source.as_deref(), ctx.request())?;

        let (endpoint, issuer) = self.resolve_endpoint(ctx).await?;

        let body = serde_urlencoded::to_string([
            ("token", token.as_str()),
            ("token_type_hint", "access_token"),
        ])
        .map_err(|e| {
            PipelineError::internal("failed to encode introspection request").with_source(e)
        })?;

        let response = endpoint
            .call(&self.client, ctx.cancellation(), &ctx.template_values(), Some(body))
            .await?
            .ensure_success()?;

        let introspection: IntrospectionResponse = serde_json::from_slice(&response.body)
            .map_err(|e| {
                PipelineError::internal("failed to unmarshal introspection response")
                    .with_source(e)
            })?;

        introspection.assert(
            issuer.as_deref(),
            &self.assertions.audience,
            self.assertions.validity_leeway,
        )?;

        let claims = introspection.claims_value();
        assert_scopes(&self.assertions.scopes, &extract_scopes(&claims))?;

        debug!(authenticator = %self.id, "token introspected successfully");

        self.subject.create_subject(&claims)
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: IntrospectionOverride =
            parse_config(AUTHENTICATOR_OAUTH2_INTROSPECTION, &self.id, Some(config))?;

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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_creation_requires_exactly_one_endpoint_source() {
        let app = AppContext::create().unwrap();

        let err =
            OAuth2IntrospectionAuthenticator::create(&app, "introspect", Some(&json!({})))
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = OAuth2IntrospectionAuthenticator::create(
            &app,
            "introspect",
            Some(&json!({
                "introspection_endpoint": {"url": "https://auth.test/introspect"},
                "metadata_endpoint": {"url": "https://auth.test/.well-known/oauth-authorization-server"},
            })),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_override_cannot_replace_the_endpoint() {
        let app = AppContext::create().unwrap();
        let prototype = OAuth2IntrospectionAuthenticator::create(
            &app,
            "introspect",
            Some(&json!({"introspection_endpoint": {"url": "https://auth.test/introspect"}})),
        )
        .unwrap();

        let err = prototype
            .override_with(Some(&json!({
                "introspection_endpoint": {"url": "https://evil.test/introspect"}
            })))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
