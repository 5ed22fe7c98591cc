//! Cookie Injection Finalizer

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
use crate::mechanisms::finalizers::{Finalizer, FINALIZER_COOKIE};
use crate::mechanisms::parse_config;
use crate::pipeline::PipelineContext;
use crate::template::Template;

#[derive(Debug, Clone, Deserialize)]
struct CookieConfig {
    cookies: HashMap<String, String>,
}

/// Renders configured cookie templates onto the upstream request
#[derive(Debug, Clone)]
pub struct CookieFinalizer {
    id: String,
    cookies: Arc<Vec<(String, Template)>>,
}

impl CookieFinalizer {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Finalizer>> {
        let config: CookieConfig = parse_config(FINALIZER_COOKIE, id, config)?;
        Self::compile(id, config)
    }

    fn compile(id: &str, config: CookieConfig) -> PipelineResult<Arc<dyn Finalizer>> {
        if config.cookies.is_empty() {
            return Err(PipelineError::configuration(format!(
                "cookie finalizer {id:?} configures no cookies"
            )));
        }

        let mut cookies = Vec::with_capacity(config.cookies.len());
        for (name, template) in config.cookies {
            let template = Template::new(&template)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
            cookies.push((name, template));
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            cookies: Arc::new(cookies),
        }))
    }
}

#[async_trait]
impl Finalizer for CookieFinalizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        FINALIZER_COOKIE
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let values = ctx.template_values();

        for (name, template) in self.cookies.iter() {
            let value = template.render(&values)?;
            ctx.add_cookie_for_upstream(name.clone(), value);
        }

        Ok(())
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Finalizer>> {
        match config {
            Some(config) => {
                let config: CookieConfig = parse_config(FINALIZER_COOKIE, &self.id, Some(config))?;
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
    async fn test_rendered_cookies_land_on_the_upstream_request() {
        let app = AppContext::create().unwrap();
        let finalizer = CookieFinalizer::create(
            &app,
            "fin",
            Some(&json!({"cookies": {"user": "{{ .Subject.ID }}"}})),
        )
        .unwrap();

        let mut ctx = PipelineContext::new(
            RequestInfo::new("GET", "http", "test.local", "/"),
            CancellationToken::new(),
        );
        ctx.set_subject(Subject::new("alice")).unwrap();

        finalizer.execute(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.upstream_cookies(),
            &[("user".to_string(), "alice".to_string())]
        );
    }
}
