//! Rule Executor
//!
//! Executes the pipeline of a matched rule: authenticators with
//! first-success-wins and authentication-only fallback, contextualizers in
//! order, AND-composed authorizers, finalizers, and finally the decision.
//! Any abort is funnelled into the error-handler phase.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use http::HeaderMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::mechanisms::error_handlers::{
    status_for_kind, DefaultErrorHandler, ErrorHandler, ErrorResponse,
};
use crate::pipeline::{PipelineContext, RequestInfo};
use crate::rules::rule::{Backend, Rule};
use crate::rules::rule_set::RuleRepository;

/// The decision for one request
pub enum Outcome {
    Allowed(AllowedOutcome),
    Denied(ErrorResponse),
}

/// Result of a successfully executed pipeline
pub struct AllowedOutcome {
    pub rule_id: String,
    pub backend: Option<Backend>,
    pub upstream_headers: HeaderMap,
    pub upstream_cookies: Vec<(String, String)>,
}

/// Surface presented to the decision and proxy services
pub struct RuleExecutor {
    repository: Arc<RuleRepository>,
    default_handler: DefaultErrorHandler,
}

impl RuleExecutor {
    pub fn new(repository: Arc<RuleRepository>) -> Self {
        Self {
            repository,
            default_handler: DefaultErrorHandler::new(),
        }
    }

    pub fn repository(&self) -> &Arc<RuleRepository> {
        &self.repository
    }

    /// Evaluate the rule pipeline for a request
    pub async fn execute(
        &self,
        mut request: RequestInfo,
        cancellation: CancellationToken,
    ) -> Outcome {
        let snapshot = self.repository.snapshot();

        let rule = match snapshot.find(&request) {
            Ok((rule, captures)) => {
                request.captures = captures;
                rule
            }
            Err(error) => {
                info!(method = %request.method, path = %request.path, %error, "no rule");
                let ctx = PipelineContext::new(request, cancellation);
                return self.handle_error(&ctx, None, error).await;
            }
        };

        let mut ctx = PipelineContext::new(request, cancellation);

        match self.run_pipeline(&rule, &mut ctx).await {
            Ok(()) => {
                info!(rule = %rule.id, "request allowed");
                let (upstream_headers, upstream_cookies) = ctx.into_upstream_parts();
                Outcome::Allowed(AllowedOutcome {
                    rule_id: rule.id.clone(),
                    backend: rule.backend.clone(),
                    upstream_headers,
                    upstream_cookies,
                })
            }
            Err(error) => {
                let error = error.into_boundary_error();
                info!(rule = %rule.id, %error, "pipeline aborted");
                self.handle_error(&ctx, Some(&rule), error).await
            }
        }
    }

    async fn run_pipeline(&self, rule: &Rule, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let mut last_error: Option<PipelineError> = None;

        for authenticator in &rule.authenticators {
            match authenticator.authenticate(ctx).await {
                Ok(subject) => {
                    ctx.set_subject(subject)?;
                    last_error = None;
                    break;
                }
                Err(error) if error.is(ErrorKind::Authentication) => {
                    debug!(
                        authenticator = %authenticator.id(),
                        %error,
                        "authenticator failed, falling back to the next one"
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        if ctx.subject().is_none() {
            return Err(last_error.unwrap_or_else(|| {
                PipelineError::internal("rule configures no authenticator")
            }));
        }

        for contextualizer in &rule.contextualizers {
            contextualizer.execute(ctx).await?;
        }

        for authorizer in &rule.authorizers {
            authorizer.execute(ctx).await?;
        }

        for finalizer in &rule.finalizers {
            finalizer.execute(ctx).await?;
        }

        Ok(())
    }

    async fn handle_error(
        &self,
        ctx: &PipelineContext,
        rule: Option<&Rule>,
        error: PipelineError,
    ) -> Outcome {
        if let Some(rule) = rule {
            let env = condition_env(ctx, &error);

            for conditional in &rule.error_handlers {
                let matches = match &conditional.condition {
                    None => true,
                    Some(condition) => match condition.evaluate(&env) {
                        Ok(matches) => matches,
                        Err(eval_error) => {
                            warn!(
                                handler = %conditional.handler.id(),
                                %eval_error,
                                "skipping error handler with failing condition"
                            );
                            false
                        }
                    },
                };
                if !matches {
                    continue;
                }

                match conditional.handler.execute(ctx, &error).await {
                    Ok(response) => return Outcome::Denied(response),
                    Err(handler_error) => {
                        warn!(
                            handler = %conditional.handler.id(),
                            %handler_error,
                            "error handler failed, falling back to the default handler"
                        );
                        break;
                    }
                }
            }
        }

        match self.default_handler.execute(ctx, &error).await {
            Ok(response) => Outcome::Denied(response),
            Err(_) => Outcome::Denied(ErrorResponse::with_status(status_for_kind(error.kind()))),
        }
    }
}

/// Environment for error-handler condition expressions
fn condition_env(ctx: &PipelineContext, error: &PipelineError) -> Value {
    let mut env = ctx.template_values();
    env["Error"] = json!({
        "Type": error.kind().as_str(),
        "Message": error.message(),
    });
    env
}
