//! Built-In Default Error Handler

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::mechanisms::error_handlers::{ErrorHandler, ErrorResponse, ERROR_HANDLER_DEFAULT};
use crate::pipeline::PipelineContext;

/// HTTP status communicated for each error kind
pub fn status_for_kind(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Authentication => 401,
        ErrorKind::Authorization => 403,
        ErrorKind::Communication => 502,
        ErrorKind::NoRuleFound => 404,
        ErrorKind::MethodNotAllowed => 405,
        ErrorKind::Configuration
        | ErrorKind::Internal
        | ErrorKind::Template
        | ErrorKind::UnsupportedType => 500,
    }
}

fn title_for_status(status: u16) -> &'static str {
    match status {
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

/// Emits a problem+json response with a status derived from the error kind
///
/// Details of server side failures are never exposed to the caller.
#[derive(Debug, Clone)]
pub struct DefaultErrorHandler {
    id: String,
}

impl Default for DefaultErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultErrorHandler {
    pub fn new() -> Self {
        Self {
            id: ERROR_HANDLER_DEFAULT.to_string(),
        }
    }

    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        _config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn ErrorHandler>> {
        Ok(Arc::new(Self { id: id.to_string() }))
    }
}

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        ERROR_HANDLER_DEFAULT
    }

    async fn execute(
        &self,
        _ctx: &PipelineContext,
        error: &PipelineError,
    ) -> PipelineResult<ErrorResponse> {
        let status = status_for_kind(error.kind());

        let mut problem = json!({
            "status": status,
            "title": title_for_status(status),
        });
        if status < 500 {
            problem["detail"] = Value::String(error.message().to_string());
        }

        let body = serde_json::to_vec(&problem)
            .map_err(|e| PipelineError::internal("failed to serialize problem document").with_source(e))?;

        Ok(ErrorResponse {
            status,
            headers: Vec::new(),
            body: Some(("application/problem+json".to_string(), Bytes::from(body))),
        })
    }

    fn override_with(&self, _config: Option<&Value>) -> PipelineResult<Arc<dyn ErrorHandler>> {
        Ok(Arc::new(self.clone()))
    }
}
