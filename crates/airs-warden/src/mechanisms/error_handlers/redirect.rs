//! Redirect Error Handler

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::error_handlers::{ErrorHandler, ErrorResponse, ERROR_HANDLER_REDIRECT};
use crate::mechanisms::parse_config;
use crate::pipeline::PipelineContext;
use crate::template::Template;

fn default_code() -> u16 {
    302
}

#[derive(Debug, Clone, Deserialize)]
struct RedirectConfig {
    /// Target URL template; rendered with the request available
    to: String,

    #[serde(default = "default_code")]
    code: u16,
}

/// Responds with a redirect, typically to a login page
#[derive(Debug, Clone)]
pub struct RedirectErrorHandler {
    id: String,
    to: Template,
    code: u16,
}

impl RedirectErrorHandler {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn ErrorHandler>> {
        let config: RedirectConfig = parse_config(ERROR_HANDLER_REDIRECT, id, config)?;
        Self::compile(id, config)
    }

    fn compile(id: &str, config: RedirectConfig) -> PipelineResult<Arc<dyn ErrorHandler>> {
        if !(300..400).contains(&config.code) {
            return Err(PipelineError::configuration(format!(
                "redirect error handler {id:?} configures the non-redirect code {}",
                config.code
            )));
        }

        let to = Template::new(&config.to)
            .map_err(|e| PipelineError::configuration(e.message().to_string()))?;

        Ok(Arc::new(Self {
            id: id.to_string(),
            to,
            code: config.code,
        }))
    }
}

#[async_trait]
impl ErrorHandler for RedirectErrorHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        ERROR_HANDLER_REDIRECT
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        _error: &PipelineError,
    ) -> PipelineResult<ErrorResponse> {
        let location = self
            .to
            .render(&ctx.template_values())
            .map_err(|e| e.into_boundary_error())?;

        Ok(ErrorResponse {
            status: self.code,
            headers: vec![("Location".to_string(), location)],
            body: None,
        })
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn ErrorHandler>> {
        match config {
            Some(config) => {
                let config: RedirectConfig =
                    parse_config(ERROR_HANDLER_REDIRECT, &self.id, Some(config))?;
                Self::compile(&self.id, config)
            }
            None => Ok(Arc::new(self.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::RequestInfo;

    #[tokio::test]
    async fn test_redirect_renders_the_target_from_the_request() {
        let app = AppContext::create().unwrap();
        let handler = RedirectErrorHandler::create(
            &app,
            "to_login",
            Some(&json!({
                "to": "https://login.test/?origin={{ .Request.URL | urlenc }}"
            })),
        )
        .unwrap();

        let ctx = PipelineContext::new(
            RequestInfo::new("GET", "https", "app.test", "/private"),
            CancellationToken::new(),
        );
        let response = handler
            .execute(&ctx, &PipelineError::authentication("no credentials"))
            .await
            .unwrap();

        assert_eq!(response.status, 302);
        assert_eq!(
            response.headers,
            vec![(
                "Location".to_string(),
                "https://login.test/?origin=https%3A%2F%2Fapp.test%2Fprivate".to_string()
            )]
        );
    }

    #[test]
    fn test_non_redirect_code_is_rejected() {
        let app = AppContext::create().unwrap();
        let err = RedirectErrorHandler::create(
            &app,
            "to_login",
            Some(&json!({"to": "https://login.test", "code": 200})),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
