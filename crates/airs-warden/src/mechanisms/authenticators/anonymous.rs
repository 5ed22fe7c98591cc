//! Anonymous Authenticator

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::PipelineResult;
use crate::mechanisms::authenticators::{Authenticator, AUTHENTICATOR_ANONYMOUS};
use crate::mechanisms::parse_config_or_default;
use crate::pipeline::{PipelineContext, Subject};

fn default_subject() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct AnonymousConfig {
    #[serde(default = "default_subject")]
    subject: String,
}

impl Default for AnonymousConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnonymousOverride {
    #[serde(default)]
    subject: Option<String>,
}

/// Always succeeds with a configured subject id and no attributes
#[derive(Debug, Clone)]
pub struct AnonymousAuthenticator {
    id: String,
    subject: String,
}

impl AnonymousAuthenticator {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authenticator>> {
        let config: AnonymousConfig =
            parse_config_or_default(AUTHENTICATOR_ANONYMOUS, id, config)?;

        Ok(Arc::new(Self {
            id: id.to_string(),
            subject: config.subject,
        }))
    }
}

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHENTICATOR_ANONYMOUS
    }

    async fn authenticate(&self, _ctx: &PipelineContext) -> PipelineResult<Subject> {
        Ok(Subject::new(self.subject.clone()))
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: AnonymousOverride =
            crate::mechanisms::parse_config(AUTHENTICATOR_ANONYMOUS, &self.id, Some(config))?;

        Ok(Arc::new(Self {
            id: self.id.clone(),
            subject: overrides.subject.unwrap_or_else(|| self.subject.clone()),
        }))
    }
}
