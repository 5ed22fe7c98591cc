//! Authorizers
//!
//! Authorizers decide whether the authenticated subject may perform the
//! request. All authorizers configured for a rule must pass; the first
//! failure aborts the pipeline with an authorization error.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::pipeline::PipelineContext;

mod allow_deny;
mod cel;
mod remote;

pub use allow_deny::{AllowAuthorizer, DenyAuthorizer};
pub use cel::CelAuthorizer;
pub use remote::RemoteAuthorizer;

pub const AUTHORIZER_ALLOW: &str = "allow";
pub const AUTHORIZER_DENY: &str = "deny";
pub const AUTHORIZER_CEL: &str = "cel";
pub const AUTHORIZER_REMOTE: &str = "remote";

/// Decides whether the request is allowed
#[async_trait]
pub trait Authorizer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> &'static str;

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()>;

    /// Specialize this prototype for a rule
    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authorizer>>;
}

type AuthorizerFactory =
    fn(&AppContext, &str, Option<&Value>) -> PipelineResult<Arc<dyn Authorizer>>;

pub(crate) const AUTHORIZER_FACTORIES: &[(&str, AuthorizerFactory)] = &[
    (AUTHORIZER_ALLOW, AllowAuthorizer::create),
    (AUTHORIZER_DENY, DenyAuthorizer::create),
    (AUTHORIZER_CEL, CelAuthorizer::create),
    (AUTHORIZER_REMOTE, RemoteAuthorizer::create),
];

/// Error value for unknown authorizer kinds
pub fn unsupported_authorizer_type(kind: &str) -> PipelineError {
    PipelineError::new(
        ErrorKind::UnsupportedType,
        format!("unsupported authorizer type {kind:?}"),
    )
}

/// Create an authorizer prototype for the given kind
pub fn create_prototype(
    app: &AppContext,
    id: &str,
    kind: &str,
    config: Option<&Value>,
) -> PipelineResult<Arc<dyn Authorizer>> {
    match AUTHORIZER_FACTORIES.iter().find(|(name, _)| *name == kind) {
        Some((_, factory)) => factory(app, id, config),
        None => Err(unsupported_authorizer_type(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_authorizer_types_are_registered() {
        assert_eq!(AUTHORIZER_FACTORIES.len(), 4);
    }

    #[test]
    fn test_create_prototype_using_known_type() {
        let app = AppContext::create().unwrap();
        let authorizer = create_prototype(&app, "foo", AUTHORIZER_ALLOW, None).unwrap();
        assert_eq!(authorizer.kind(), AUTHORIZER_ALLOW);
    }

    #[test]
    fn test_create_prototype_using_unknown_type() {
        let app = AppContext::create().unwrap();

        let err = create_prototype(&app, "foo", "unknown_kind", None).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(
            err.to_string(),
            unsupported_authorizer_type("unknown_kind").to_string()
        );
    }
}
