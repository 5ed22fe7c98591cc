//! Expression Based Authorizer

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{PipelineError, PipelineResult};
use crate::expression::Expression;
use crate::mechanisms::authorizers::{Authorizer, AUTHORIZER_CEL};
use crate::mechanisms::parse_config;
use crate::pipeline::PipelineContext;

#[derive(Debug, Clone, Deserialize)]
struct ExpressionConfig {
    expression: String,

    /// Message reported when the expression evaluates to false
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CelConfig {
    expressions: Vec<ExpressionConfig>,
}

struct CompiledExpression {
    expression: Expression,
    message: Option<String>,
}

/// Evaluates boolean expressions over `{Subject, Request, Outputs}`; all
/// expressions must hold
#[derive(Debug, Clone)]
pub struct CelAuthorizer {
    id: String,
    expressions: Arc<Vec<CompiledExpression>>,
}

impl CelAuthorizer {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authorizer>> {
        let config: CelConfig = parse_config(AUTHORIZER_CEL, id, config)?;
        Self::compile(id, config)
    }

    fn compile(id: &str, config: CelConfig) -> PipelineResult<Arc<dyn Authorizer>> {
        if config.expressions.is_empty() {
            return Err(PipelineError::configuration(format!(
                "cel authorizer {id:?} configures no expressions"
            )));
        }

        let mut expressions = Vec::with_capacity(config.expressions.len());
        for entry in config.expressions {
            expressions.push(CompiledExpression {
                expression: Expression::new(&entry.expression)?,
                message: entry.message,
            });
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            expressions: Arc::new(expressions),
        }))
    }
}

#[async_trait]
impl Authorizer for CelAuthorizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHORIZER_CEL
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let env = ctx.template_values();

        for compiled in self.expressions.iter() {
            if !compiled.expression.evaluate(&env)? {
                let message = compiled.message.clone().unwrap_or_else(|| {
                    format!("expression {:?} failed", compiled.expression.source())
                });
                return Err(PipelineError::authorization(message));
            }
        }

        debug!(authorizer = %self.id, "all expressions passed");
        Ok(())
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authorizer>> {
        match config {
            // a full replacement of the expression list
            Some(config) => {
                let config: CelConfig = parse_config(AUTHORIZER_CEL, &self.id, Some(config))?;
                Self::compile(&self.id, config)
            }
            None => Ok(Arc::new(self.clone())),
        }
    }
}
