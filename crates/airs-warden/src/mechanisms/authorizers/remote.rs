//! Remote Authorizer

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
use crate::mechanisms::authorizers::{Authorizer, AUTHORIZER_REMOTE};
use crate::mechanisms::parse_config;
use crate::pipeline::PipelineContext;
use crate::template::Template;

#[derive(Debug, Clone, Deserialize)]
struct RemoteConfig {
    endpoint: Endpoint,

    /// Body template rendered with the pipeline's template values
    #[serde(default)]
    payload: Option<String>,

    /// Response headers copied onto the upstream request
    #[serde(default)]
    forward_response_headers_to_upstream: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoteOverride {
    #[serde(default)]
    payload: Option<String>,

    #[serde(default)]
    forward_response_headers_to_upstream: Option<Vec<String>>,
}

/// Delegates the authorization decision to a remote endpoint
///
/// A 2xx response allows the request; 401 and 403 deny it; anything else is
/// a communication problem. A JSON response body is stored in the outputs
/// bag under the authorizer's id.
#[derive(Debug, Clone)]
pub struct RemoteAuthorizer {
    id: String,
    endpoint: Endpoint,
    payload: Option<String>,
    forward_response_headers: Vec<String>,
    client: Arc<HttpClient>,
}

impl RemoteAuthorizer {
    pub(crate) fn create(
        app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authorizer>> {
        let config: RemoteConfig = parse_config(AUTHORIZER_REMOTE, id, config)?;
        config.endpoint.validate_templates()?;
        if let Some(payload) = &config.payload {
            Template::new(payload)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            endpoint: config.endpoint,
            payload: config.payload,
            forward_response_headers: config.forward_response_headers_to_upstream,
            client: Arc::clone(app.http_client()),
        }))
    }
}

#[async_trait]
impl Authorizer for RemoteAuthorizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHORIZER_REMOTE
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let values = ctx.template_values();

        let body = self
            .payload
            .as_deref()
            .map(|payload| {
                Template::new(payload).and_then(|template| template.render(&values))
            })
            .transpose()?;

        let response = self
            .endpoint
            .call(&self.client, ctx.cancellation(), &values, body)
            .await?;

        match response.status {
            401 | 403 => {
                return Err(PipelineError::authorization(
                    "request denied by the remote authorizer",
                ));
            }
            _ => {}
        }
        let response = response.ensure_success()?;

        for name in &self.forward_response_headers {
            if let Some(value) = response.header(name) {
                let value = value.to_string();
                ctx.add_header_for_upstream(name, &value)?;
            }
        }

        if response.is_json() && !response.body.is_empty() {
            ctx.outputs_mut().insert(self.id.clone(), response.json()?);
        }

        debug!(authorizer = %self.id, "request allowed by the remote authorizer");
        Ok(())
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authorizer>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: RemoteOverride = parse_config(AUTHORIZER_REMOTE, &self.id, Some(config))?;

        let mut instance = self.clone();
        if let Some(payload) = overrides.payload {
            Template::new(&payload)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
            instance.payload = Some(payload);
        }
        if let Some(headers) = overrides.forward_response_headers_to_upstream {
            instance.forward_response_headers = headers;
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
        let err = RemoteAuthorizer::create(&app, "remote", Some(&json!({}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_payload_template_is_compiled_at_creation() {
        let app = AppContext::create().unwrap();
        let err = RemoteAuthorizer::create(
            &app,
            "remote",
            Some(&json!({
                "endpoint": {"url": "https://authz.test/check"},
                "payload": "{{ .Subject.ID }",
            })),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
