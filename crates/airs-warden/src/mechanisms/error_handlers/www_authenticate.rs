//! WWW-Authenticate Challenge Error Handler

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::error_handlers::{
    ErrorHandler, ErrorResponse, ERROR_HANDLER_WWW_AUTHENTICATE,
};
use crate::mechanisms::parse_config_or_default;
use crate::pipeline::PipelineContext;

fn default_realm() -> String {
    "Please authenticate".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct WwwAuthenticateConfig {
    #[serde(default = "default_realm")]
    realm: String,
}

impl Default for WwwAuthenticateConfig {
    fn default() -> Self {
        Self {
            realm: default_realm(),
        }
    }
}

/// Responds with a basic auth challenge
#[derive(Debug, Clone)]
pub struct WwwAuthenticateErrorHandler {
    id: String,
    realm: String,
}

impl WwwAuthenticateErrorHandler {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn ErrorHandler>> {
        let config: WwwAuthenticateConfig =
            parse_config_or_default(ERROR_HANDLER_WWW_AUTHENTICATE, id, config)?;

        Ok(Arc::new(Self {
            id: id.to_string(),
            realm: config.realm,
        }))
    }
}

#[async_trait]
impl ErrorHandler for WwwAuthenticateErrorHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        ERROR_HANDLER_WWW_AUTHENTICATE
    }

    async fn execute(
        &self,
        _ctx: &PipelineContext,
        error: &PipelineError,
    ) -> PipelineResult<ErrorResponse> {
        let problem = json!({
            "status": 401,
            "title": "Unauthorized",
            "detail": error.message(),
        });
        let body = serde_json::to_vec(&problem).map_err(|e| {
            PipelineError::internal("failed to serialize problem document").with_source(e)
        })?;

        Ok(ErrorResponse {
            status: 401,
            headers: vec![(
                "WWW-Authenticate".to_string(),
                format!("Basic realm={:?}", self.realm),
            )],
            body: Some(("application/problem+json".to_string(), Bytes::from(body))),
        })
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn ErrorHandler>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: WwwAuthenticateConfig =
            parse_config_or_default(ERROR_HANDLER_WWW_AUTHENTICATE, &self.id, Some(config))?;

        Ok(Arc::new(Self {
            id: self.id.clone(),
            realm: overrides.realm,
        }))
    }
}
