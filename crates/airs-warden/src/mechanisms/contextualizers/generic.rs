//! Generic Endpoint Contextualizer

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::endpoint::{Endpoint, HttpClient};
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::mechanisms::contextualizers::{Contextualizer, CONTEXTUALIZER_GENERIC};
use crate::mechanisms::parse_config;
use crate::pipeline::PipelineContext;
use crate::template::Template;

#[derive(Debug, Clone, Deserialize)]
struct GenericConfig {
    endpoint: Endpoint,

    /// Request headers copied onto the call
    #[serde(default)]
    forward_headers: Vec<String>,

    /// Body template rendered with the pipeline's template values
    #[serde(default)]
    payload: Option<String>,

    /// Log and skip communication errors instead of aborting the pipeline
    #[serde(default)]
    continue_pipeline_on_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenericOverride {
    #[serde(default)]
    forward_headers: Option<Vec<String>>,

    #[serde(default)]
    payload: Option<String>,

    #[serde(default)]
    continue_pipeline_on_error: Option<bool>,
}

/// Calls an endpoint with the pipeline state and stores the decoded
/// response under the contextualizer's id
#[derive(Debug, Clone)]
pub struct GenericContextualizer {
    id: String,
    endpoint: Endpoint,
    forward_headers: Vec<String>,
    payload: Option<String>,
    continue_on_error: bool,
    client: Arc<HttpClient>,
}

impl GenericContextualizer {
    pub(crate) fn create(
        app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Contextualizer>> {
        let config: GenericConfig = parse_config(CONTEXTUALIZER_GENERIC, id, config)?;
        config.endpoint.validate_templates()?;
        if let Some(payload) = &config.payload {
            Template::new(payload)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            endpoint: config.endpoint,
            forward_headers: config.forward_headers,
            payload: config.payload,
            continue_on_error: config.continue_pipeline_on_error,
            client: Arc::clone(app.http_client()),
        }))
    }

    async fn call_endpoint(&self, ctx: &PipelineContext) -> PipelineResult<Value> {
        let values = ctx.template_values();

        let mut endpoint = self.endpoint.clone();
        for name in &self.forward_headers {
            if let Some(value) = ctx.request().header(name) {
                endpoint.headers.insert(name.clone(), value);
            }
        }

        let body = self
            .payload
            .as_deref()
            .map(|payload| {
                Template::new(payload).and_then(|template| template.render(&values))
            })
            .transpose()?;

        let response = endpoint
            .call(&self.client, ctx.cancellation(), &values, body)
            .await?
            .ensure_success()?;

        if response.is_json() {
            response.json()
        } else {
            Ok(Value::String(
                String::from_utf8_lossy(&response.body).into_owned(),
            ))
        }
    }
}

#[async_trait]
impl Contextualizer for GenericContextualizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        CONTEXTUALIZER_GENERIC
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        match self.call_endpoint(ctx).await {
            Ok(value) => {
                debug!(contextualizer = %self.id, "context resolved");
                ctx.outputs_mut().insert(self.id.clone(), value);
                Ok(())
            }
            Err(error)
                if self.continue_on_error && error.is(ErrorKind::Communication) =>
            {
                warn!(contextualizer = %self.id, %error, "ignoring communication error");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Contextualizer>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: GenericOverride =
            parse_config(CONTEXTUALIZER_GENERIC, &self.id, Some(config))?;

        let mut instance = self.clone();
        if let Some(forward_headers) = overrides.forward_headers {
            instance.forward_headers = forward_headers;
        }
        if let Some(payload) = overrides.payload {
            Template::new(&payload)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
            instance.payload = Some(payload);
        }
        if let Some(continue_on_error) = overrides.continue_pipeline_on_error {
            instance.continue_on_error = continue_on_error;
        }

        Ok(Arc::new(instance))
    }
}
