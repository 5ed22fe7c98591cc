//! Header Injection Finalizer

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::finalizers::{Finalizer, FINALIZER_HEADER};
use crate::mechanisms::parse_config;
use crate::pipeline::PipelineContext;
use crate::template::Template;

#[derive(Debug, Clone, Deserialize)]
struct HeaderConfig {
    headers: HashMap<String, String>,
}

/// Renders configured header templates onto the upstream request
#[derive(Debug, Clone)]
pub struct HeaderFinalizer {
    id: String,
    headers: Arc<Vec<(String, Template)>>,
}

impl HeaderFinalizer {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Finalizer>> {
        let config: HeaderConfig = parse_config(FINALIZER_HEADER, id, config)?;
        Self::compile(id, config)
    }

    fn compile(id: &str, config: HeaderConfig) -> PipelineResult<Arc<dyn Finalizer>> {
        if config.headers.is_empty() {
            return Err(PipelineError::configuration(format!(
                "header finalizer {id:?} configures no headers"
            )));
        }

        let mut headers = Vec::with_capacity(config.headers.len());
        for (name, template) in config.headers {
            let template = Template::new(&template)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
            headers.push((name, template));
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            headers: Arc::new(headers),
        }))
    }
}

#[async_trait]
impl Finalizer for HeaderFinalizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        FINALIZER_HEADER
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let values = ctx.template_values();

        for (name, template) in self.headers.iter() {
            let value = template.render(&values)?;
            ctx.add_header_for_upstream(name, &value)?;
        }

        Ok(())
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Finalizer>> {
        match config {
            Some(config) => {
                let config: HeaderConfig = parse_config(FINALIZER_HEADER, &self.id, Some(config))?;
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
    use crate::pipeline::{RequestInfo, Subject};

    #[tokio::test]
    async fn test_rendered_headers_land_on_the_upstream_request() {
        let app = AppContext::create().unwrap();
        let finalizer = HeaderFinalizer::create(
            &app,
            "fin",
            Some(&json!({"headers": {"X-User": "{{ .Subject.ID }}"}})),
        )
        .unwrap();

        let mut ctx = PipelineContext::new(
            RequestInfo::new("GET", "http", "test.local", "/"),
            CancellationToken::new(),
        );
        ctx.set_subject(Subject::new("alice")).unwrap();

        finalizer.execute(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.upstream_headers().get("X-User").unwrap().to_str().unwrap(),
            "alice"
        );
    }

    #[test]
    fn test_templates_are_compiled_at_creation() {
        let app = AppContext::create().unwrap();
        let err = HeaderFinalizer::create(
            &app,
            "fin",
            Some(&json!({"headers": {"X-User": "{{ .Subject.ID }"}})),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
