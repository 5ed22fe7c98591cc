//! Finalizers
//!
//! Finalizers transform the outgoing decision or proxied request after
//! successful authorization: header injection, cookie injection, or minting
//! a signed JWT from the process's key registry. They run in configured
//! order.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::pipeline::PipelineContext;

mod cookie;
mod header;
mod jwt;

pub use cookie::CookieFinalizer;
pub use header::HeaderFinalizer;
pub use jwt::JwtFinalizer;

pub const FINALIZER_COOKIE: &str = "cookie";
pub const FINALIZER_HEADER: &str = "header";
pub const FINALIZER_JWT: &str = "jwt";

/// Transforms the outgoing decision or proxied request
#[async_trait]
pub trait Finalizer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> &'static str;

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()>;

    /// Specialize this prototype for a rule
    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Finalizer>>;
}

type FinalizerFactory =
    fn(&AppContext, &str, Option<&Value>) -> PipelineResult<Arc<dyn Finalizer>>;

pub(crate) const FINALIZER_FACTORIES: &[(&str, FinalizerFactory)] = &[
    (FINALIZER_COOKIE, CookieFinalizer::create),
    (FINALIZER_HEADER, HeaderFinalizer::create),
    (FINALIZER_JWT, JwtFinalizer::create),
];

/// Error value for unknown finalizer kinds
pub fn unsupported_finalizer_type(kind: &str) -> PipelineError {
    PipelineError::new(
        ErrorKind::UnsupportedType,
        format!("unsupported finalizer type {kind:?}"),
    )
}

/// Create a finalizer prototype for the given kind
pub fn create_prototype(
    app: &AppContext,
    id: &str,
    kind: &str,
    config: Option<&Value>,
) -> PipelineResult<Arc<dyn Finalizer>> {
    match FINALIZER_FACTORIES.iter().find(|(name, _)| *name == kind) {
        Some((_, factory)) => factory(app, id, config),
        None => Err(unsupported_finalizer_type(kind)),
    }
}
