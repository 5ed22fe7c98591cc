//! Generic Endpoint Authenticator

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
use crate::mechanisms::authenticators::{Authenticator, AUTHENTICATOR_GENERIC};
use crate::mechanisms::{parse_config, SubjectInfo};
use crate::pipeline::{PipelineContext, Subject};
use crate::template::Template;

#[derive(Debug, Clone, Deserialize)]
struct GenericConfig {
    identity_info_endpoint: Endpoint,

    #[serde(default)]
    authentication_data_source: Option<Vec<TokenSource>>,

    /// Request headers copied onto the identity info call
    #[serde(default)]
    forward_headers: Vec<String>,

    /// Request cookies copied onto the identity info call
    #[serde(default)]
    forward_cookies: Vec<String>,

    /// Body template; rendered with `.AuthenticationData` available
    #[serde(default)]
    payload: Option<String>,

    #[serde(default)]
    subject: SubjectInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenericOverride {
    #[serde(default)]
    authentication_data_source: Option<Vec<TokenSource>>,

    #[serde(default)]
    subject: Option<SubjectInfo>,
}

/// Delegates authentication to a custom endpoint returning a JSON document
/// which is mapped into the subject via configured JSON pointers
#[derive(Debug, Clone)]
pub struct GenericAuthenticator {
    id: String,
    endpoint: Endpoint,
    data_source: Option<Vec<TokenSource>>,
    forward_headers: Vec<String>,
    forward_cookies: Vec<String>,
    payload: Option<String>,
    subject: SubjectInfo,
    client: Arc<HttpClient>,
}

impl GenericAuthenticator {
    pub(crate) fn create(
        app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authenticator>> {
        let config: GenericConfig = parse_config(AUTHENTICATOR_GENERIC, id, config)?;
        config.identity_info_endpoint.validate_templates()?;
        if let Some(payload) = &config.payload {
            Template::new(payload)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            endpoint: config.identity_info_endpoint,
            data_source: config.authentication_data_source,
            forward_headers: config.forward_headers,
            forward_cookies: config.forward_cookies,
            payload: config.payload,
            subject: config.subject,
            client: Arc::clone(app.http_client()),
        }))
    }
}

#[async_trait]
impl Authenticator for GenericAuthenticator {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHENTICATOR_GENERIC
    }

    async fn authenticate(&self, ctx: &PipelineContext) -> PipelineResult<Subject> {
        let data = extract_token(self.data_source.as_deref(), ctx.request())?;

        let mut values = ctx.template_values();
        values["AuthenticationData"] = Value::String(data);

        let mut endpoint = self.endpoint.clone();
        for name in &self.forward_headers {
            if let Some(value) = ctx.request().header(name) {
                endpoint.headers.insert(name.clone(), value);
            }
        }
        if !self.forward_cookies.is_empty() {
            let cookies: Vec<String> = self
                .forward_cookies
                .iter()
                .filter_map(|name| {
                    ctx.request()
                        .cookie(name)
                        .map(|value| format!("{name}={value}"))
                })
                .collect();
            if !cookies.is_empty() {
                endpoint
                    .headers
                    .insert("Cookie".to_string(), cookies.join("; "));
            }
        }

        let body = self
            .payload
            .as_deref()
            .map(|payload| {
                Template::new(payload).and_then(|template| template.render(&values))
            })
            .transpose()
            .map_err(|e| e.into_boundary_error())?;

        let response = endpoint
            .call(&self.client, ctx.cancellation(), &values, body)
            .await?;

        match response.status {
            401 | 403 => {
                return Err(PipelineError::authentication(
                    "authentication data rejected by the identity info endpoint",
                ));
            }
            _ => {}
        }
        let response = response.ensure_success()?;

        let claims = response.json()?;

        debug!(authenticator = %self.id, "identity info resolved");

        self.subject.create_subject(&claims)
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: GenericOverride =
            parse_config(AUTHENTICATOR_GENERIC, &self.id, Some(config))?;

        let mut instance = self.clone();
        if let Some(data_source) = overrides.authentication_data_source {
            instance.data_source = Some(data_source);
        }
        if let Some(subject) = overrides.subject {
            instance.subject = subject;
        }

        Ok(Arc::new(instance))
    }
}
