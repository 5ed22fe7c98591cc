//! Contextualizers
//!
//! Contextualizers enrich the pipeline state after authentication by calling
//! out to external systems and storing the decoded response in the
//! [`Outputs`](crate::pipeline::Outputs) bag under their id. All configured
//! contextualizers run in declaration order.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::pipeline::PipelineContext;

mod generic;

pub use generic::GenericContextualizer;

pub const CONTEXTUALIZER_GENERIC: &str = "generic";

/// Enriches the pipeline state
#[async_trait]
pub trait Contextualizer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> &'static str;

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()>;

    /// Specialize this prototype for a rule
    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Contextualizer>>;
}

type ContextualizerFactory =
    fn(&AppContext, &str, Option<&Value>) -> PipelineResult<Arc<dyn Contextualizer>>;

pub(crate) const CONTEXTUALIZER_FACTORIES: &[(&str, ContextualizerFactory)] =
    &[(CONTEXTUALIZER_GENERIC, GenericContextualizer::create)];

/// Error value for unknown contextualizer kinds
pub fn unsupported_contextualizer_type(kind: &str) -> PipelineError {
    PipelineError::new(
        ErrorKind::UnsupportedType,
        format!("unsupported contextualizer type {kind:?}"),
    )
}

/// Create a contextualizer prototype for the given kind
pub fn create_prototype(
    app: &AppContext,
    id: &str,
    kind: &str,
    config: Option<&Value>,
) -> PipelineResult<Arc<dyn Contextualizer>> {
    match CONTEXTUALIZER_FACTORIES
        .iter()
        .find(|(name, _)| *name == kind)
    {
        Some((_, factory)) => factory(app, id, config),
        None => Err(unsupported_contextualizer_type(kind)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_prototype_using_known_type() {
        let app = AppContext::create().unwrap();
        let config = json!({"endpoint": {"url": "https://ctx.test/info"}});

        let contextualizer =
            create_prototype(&app, "foo", CONTEXTUALIZER_GENERIC, Some(&config)).unwrap();

        assert_eq!(contextualizer.kind(), CONTEXTUALIZER_GENERIC);
    }

    #[test]
    fn test_create_prototype_using_unknown_type() {
        let app = AppContext::create().unwrap();

        let err = create_prototype(&app, "foo", "unknown_kind", None).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(
            err.to_string(),
            unsupported_contextualizer_type("unknown_kind").to_string()
        );
    }
}
