//! Trivial Allow and Deny Authorizers

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::authorizers::{Authorizer, AUTHORIZER_ALLOW, AUTHORIZER_DENY};
use crate::pipeline::PipelineContext;

/// Allows every request
#[derive(Debug, Clone)]
pub struct AllowAuthorizer {
    id: String,
}

impl AllowAuthorizer {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        _config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authorizer>> {
        Ok(Arc::new(Self { id: id.to_string() }))
    }
}

#[async_trait]
impl Authorizer for AllowAuthorizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHORIZER_ALLOW
    }

    async fn execute(&self, _ctx: &mut PipelineContext) -> PipelineResult<()> {
        Ok(())
    }

    fn override_with(&self, _config: Option<&Value>) -> PipelineResult<Arc<dyn Authorizer>> {
        Ok(Arc::new(self.clone()))
    }
}

/// Denies every request
#[derive(Debug, Clone)]
pub struct DenyAuthorizer {
    id: String,
}

impl DenyAuthorizer {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        _config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authorizer>> {
        Ok(Arc::new(Self { id: id.to_string() }))
    }
}

#[async_trait]
impl Authorizer for DenyAuthorizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHORIZER_DENY
    }

    async fn execute(&self, _ctx: &mut PipelineContext) -> PipelineResult<()> {
        Err(PipelineError::authorization("access denied"))
    }

    fn override_with(&self, _config: Option<&Value>) -> PipelineResult<Arc<dyn Authorizer>> {
        Ok(Arc::new(self.clone()))
    }
}
