//! Error Handlers
//!
//! Error handlers convert a pipeline error into the response the caller
//! sees. A rule pairs each handler with a condition expression; the first
//! matching handler wins, and the built-in default handler always matches.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::pipeline::PipelineContext;

mod default;
mod redirect;
mod www_authenticate;

pub use default::{status_for_kind, DefaultErrorHandler};
pub use redirect::RedirectErrorHandler;
pub use www_authenticate::WwwAuthenticateErrorHandler;

pub const ERROR_HANDLER_DEFAULT: &str = "default";
pub const ERROR_HANDLER_REDIRECT: &str = "redirect";
pub const ERROR_HANDLER_WWW_AUTHENTICATE: &str = "www_authenticate";

/// Response produced by an error handler
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,

    /// Content type and payload
    pub body: Option<(String, Bytes)>,
}

impl ErrorResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }
}

/// Converts a pipeline error into a response
#[async_trait]
pub trait ErrorHandler: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> &'static str;

    async fn execute(
        &self,
        ctx: &PipelineContext,
        error: &PipelineError,
    ) -> PipelineResult<ErrorResponse>;

    /// Specialize this prototype for a rule
    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn ErrorHandler>>;
}

type ErrorHandlerFactory =
    fn(&AppContext, &str, Option<&Value>) -> PipelineResult<Arc<dyn ErrorHandler>>;

pub(crate) const ERROR_HANDLER_FACTORIES: &[(&str, ErrorHandlerFactory)] = &[
    (ERROR_HANDLER_DEFAULT, DefaultErrorHandler::create),
    (ERROR_HANDLER_REDIRECT, RedirectErrorHandler::create),
    (
        ERROR_HANDLER_WWW_AUTHENTICATE,
        WwwAuthenticateErrorHandler::create,
    ),
];

/// Error value for unknown error handler kinds
pub fn unsupported_error_handler_type(kind: &str) -> PipelineError {
    PipelineError::new(
        ErrorKind::UnsupportedType,
        format!("unsupported error handler type {kind:?}"),
    )
}

/// Create an error handler prototype for the given kind
pub fn create_prototype(
    app: &AppContext,
    id: &str,
    kind: &str,
    config: Option<&Value>,
) -> PipelineResult<Arc<dyn ErrorHandler>> {
    match ERROR_HANDLER_FACTORIES
        .iter()
        .find(|(name, _)| *name == kind)
    {
        Some((_, factory)) => factory(app, id, config),
        None => Err(unsupported_error_handler_type(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // there are 3 error handlers implemented, which should have been registered
    #[test]
    fn test_all_error_handler_types_are_registered() {
        assert_eq!(ERROR_HANDLER_FACTORIES.len(), 3);
    }

    #[test]
    fn test_create_prototype_using_known_type() {
        let app = AppContext::create().unwrap();

        let handler = create_prototype(&app, "foo", ERROR_HANDLER_DEFAULT, None).unwrap();

        assert_eq!(handler.kind(), ERROR_HANDLER_DEFAULT);
    }

    #[test]
    fn test_create_prototype_using_unknown_type() {
        let app = AppContext::create().unwrap();

        let err = create_prototype(&app, "foo", "unknown_kind", None).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(
            err.to_string(),
            unsupported_error_handler_type("unknown_kind").to_string()
        );
    }
}
