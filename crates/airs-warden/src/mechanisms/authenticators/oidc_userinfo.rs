//! OIDC Userinfo Authenticator

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::endpoint::{Endpoint, HttpClient};
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::authenticators::extractors::{extract_token, TokenSource};
use crate::mechanisms::authenticators::{Authenticator, AUTHENTICATOR_OIDC_USERINFO};
use crate::mechanisms::{parse_config, SubjectInfo};
use crate::pipeline::{PipelineContext, Subject};

#[derive(Debug, Clone, Deserialize)]
struct UserinfoConfig {
    userinfo_endpoint: Endpoint,

    #[serde(default)]
    token_source: Option<Vec<TokenSource>>,

    #[serde(default)]
    subject: SubjectInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct UserinfoOverride {
    #[serde(default)]
    token_source: Option<Vec<TokenSource>>,

    #[serde(default)]
    subject: Option<SubjectInfo>,
}

/// Resolves the subject by presenting the bearer token to the OIDC
/// userinfo endpoint
#[derive(Debug, Clone)]
pub struct OidcUserinfoAuthenticator {
    id: String,
    endpoint: Endpoint,
    token_source: Option<Vec<TokenSource>>,
    subject: SubjectInfo,
    client: Arc<HttpClient>,
}

impl OidcUserinfoAuthenticator {
    pub(crate) fn create(
        app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authenticator>> {
        let config: UserinfoConfig = parse_config(AUTHENTICATOR_OIDC_USERINFO, id, config)?;
        config.userinfo_endpoint.validate_templates()?;

        Ok(Arc::new(Self {
            id: id.to_string(),
            endpoint: config.userinfo_endpoint,
            token_source: config.token_source,
            subject: config.subject,
            client: Arc::clone(app.http_client()),
        }))
    }
}

#[async_trait]
impl Authenticator for OidcUserinfoAuthenticator {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHENTICATOR_OIDC_USERINFO
    }

    async fn authenticate(&self, ctx: &PipelineContext) -> PipelineResult<Subject> {
        let token = extract_token(self.token_source.as_deref(), ctx.request())?;

        let mut endpoint = self.endpoint.clone();
        endpoint
            .headers
            .insert("Authorization".to_string(), format!("Bearer {token}"));
        endpoint
            .headers
            .entry("Accept".to_string())
            .or_insert_with(|| "application/json".to_string());

        let response = endpoint
            .call(&self.client, ctx.cancellation(), &ctx.template_values(), None)
            .await?;

        match response.status {
            401 | 403 => {
                return Err(PipelineError::authentication(
                    "token was rejected by the userinfo endpoint",
                ));
            }
            _ => {}
        }
        let response = response.ensure_success()?;

        let claims = response.json()?;

        debug!(authenticator = %self.id, "userinfo resolved");

        self.subject.create_subject(&claims)
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: UserinfoOverride =
            parse_config(AUTHENTICATOR_OIDC_USERINFO, &self.id, Some(config))?;

        let mut instance = self.clone();
        if let Some(token_source) = overrides.token_source {
            instance.token_source = Some(token_source);
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
    fn test_creation_requires_an_endpoint() {
        let app = AppContext::create().unwrap();
        let err = OidcUserinfoAuthenticator::create(&app, "userinfo", Some(&json!({})))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_templated_endpoint_is_validated_at_creation() {
        let app = AppContext::create().unwrap();
        let err = OidcUserinfoAuthenticator::create(
            &app,
            "userinfo",
            Some(&json!({"userinfo_endpoint": {"url": "https://auth.test/{{ bad }}"}})),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
