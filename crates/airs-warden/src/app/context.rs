//! Application Context
//!
//! The explicit dependency bundle handed to mechanism factories: the injected
//! HTTP client collaborator and the process's signing key registry. There is
//! no global state and no invocation graph; whoever constructs mechanisms
//! passes the context along.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 3: Internal module imports
use crate::app::keys::KeyRegistry;
use crate::endpoint::HttpClient;
use crate::error::PipelineResult;

/// Dependencies shared by all mechanisms
#[derive(Clone)]
pub struct AppContext {
    http_client: Arc<HttpClient>,
    key_registry: Arc<KeyRegistry>,
}

impl AppContext {
    pub fn new(http_client: Arc<HttpClient>, key_registry: Arc<KeyRegistry>) -> Self {
        Self {
            http_client,
            key_registry,
        }
    }

    /// Context with a fresh HTTP client and an empty key registry
    pub fn create() -> PipelineResult<Self> {
        Ok(Self::new(
            Arc::new(HttpClient::new()?),
            Arc::new(KeyRegistry::default()),
        ))
    }

    pub fn http_client(&self) -> &Arc<HttpClient> {
        &self.http_client
    }

    pub fn key_registry(&self) -> &Arc<KeyRegistry> {
        &self.key_registry
    }
}
