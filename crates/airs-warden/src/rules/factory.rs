//! Two-Phase Rule Construction
//!
//! Phase one parses the mechanism catalogue and registers all prototypes.
//! Phase two builds rules, resolving mechanism references against the
//! registry and specializing prototypes with per-rule override
//! configurations. Unresolved references are rejected at load time.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{PipelineError, PipelineResult};
use crate::expression::Expression;
use crate::mechanisms::authenticators::{self, Authenticator};
use crate::mechanisms::authorizers::{self, Authorizer};
use crate::mechanisms::contextualizers::{self, Contextualizer};
use crate::mechanisms::error_handlers::{self, ErrorHandler};
use crate::mechanisms::finalizers::{self, Finalizer};
use crate::rules::config::{DefaultRuleConfig, ErrorStepConfig, RuleConfig, StepRef};
use crate::rules::matcher::RuleMatcher;
use crate::rules::rule::{Backend, ConditionalErrorHandler, Rule};

/// One mechanism catalogue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechanismConfig {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// The mechanism catalogue document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MechanismCatalogue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authenticators: Vec<MechanismConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contextualizers: Vec<MechanismConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorizers: Vec<MechanismConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<MechanismConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_handlers: Vec<MechanismConfig>,
}

fn register<T: ?Sized>(
    category: &str,
    registry: &mut HashMap<String, Arc<T>>,
    id: &str,
    prototype: Arc<T>,
) -> PipelineResult<()> {
    if registry.insert(id.to_string(), prototype).is_some() {
        return Err(PipelineError::configuration(format!(
            "duplicate {category} id {id:?}"
        )));
    }
    Ok(())
}

/// All mechanism prototypes, keyed by id within their category
#[derive(Default)]
pub struct MechanismRegistry {
    authenticators: HashMap<String, Arc<dyn Authenticator>>,
    contextualizers: HashMap<String, Arc<dyn Contextualizer>>,
    authorizers: HashMap<String, Arc<dyn Authorizer>>,
    finalizers: HashMap<String, Arc<dyn Finalizer>>,
    error_handlers: HashMap<String, Arc<dyn ErrorHandler>>,
}

impl MechanismRegistry {
    pub fn from_catalogue(
        app: &AppContext,
        catalogue: &MechanismCatalogue,
    ) -> PipelineResult<Self> {
        let mut registry = Self::default();

        for entry in &catalogue.authenticators {
            let prototype = authenticators::create_prototype(
                app,
                &entry.id,
                &entry.kind,
                entry.config.as_ref(),
            )?;
            register("authenticator", &mut registry.authenticators, &entry.id, prototype)?;
        }

        for entry in &catalogue.contextualizers {
            let prototype = contextualizers::create_prototype(
                app,
                &entry.id,
                &entry.kind,
                entry.config.as_ref(),
            )?;
            register(
                "contextualizer",
                &mut registry.contextualizers,
                &entry.id,
                prototype,
            )?;
        }

        for entry in &catalogue.authorizers {
            let prototype = authorizers::create_prototype(
                app,
                &entry.id,
                &entry.kind,
                entry.config.as_ref(),
            )?;
            register("authorizer", &mut registry.authorizers, &entry.id, prototype)?;
        }

        for entry in &catalogue.finalizers {
            let prototype = finalizers::create_prototype(
                app,
                &entry.id,
                &entry.kind,
                entry.config.as_ref(),
            )?;
            register("finalizer", &mut registry.finalizers, &entry.id, prototype)?;
        }

        for entry in &catalogue.error_handlers {
            let prototype = error_handlers::create_prototype(
                app,
                &entry.id,
                &entry.kind,
                entry.config.as_ref(),
            )?;
            register(
                "error handler",
                &mut registry.error_handlers,
                &entry.id,
                prototype,
            )?;
        }

        debug!(
            authenticators = registry.authenticators.len(),
            contextualizers = registry.contextualizers.len(),
            authorizers = registry.authorizers.len(),
            finalizers = registry.finalizers.len(),
            error_handlers = registry.error_handlers.len(),
            "mechanism catalogue loaded"
        );

        Ok(registry)
    }

    fn lookup<'a, T: ?Sized>(
        category: &str,
        registry: &'a HashMap<String, Arc<T>>,
        id: &str,
    ) -> PipelineResult<&'a Arc<T>> {
        registry.get(id).ok_or_else(|| {
            PipelineError::configuration(format!("no {category} with id {id:?} configured"))
        })
    }
}

/// Builds rules against a mechanism registry
pub struct RuleFactory {
    registry: MechanismRegistry,
}

impl RuleFactory {
    pub fn new(registry: MechanismRegistry) -> Self {
        Self { registry }
    }

    /// Build a rule from its configuration
    pub fn build_rule(
        &self,
        config: &RuleConfig,
        src_file: Option<&str>,
    ) -> PipelineResult<Rule> {
        let matcher = RuleMatcher::from_config(&config.matcher)?;

        let mut rule = Rule {
            id: config.id.clone(),
            src_file: src_file.map(str::to_string),
            matcher,
            backend: config.backend.as_ref().map(Backend::from),
            authenticators: Vec::new(),
            contextualizers: Vec::new(),
            authorizers: Vec::new(),
            finalizers: Vec::new(),
            error_handlers: Vec::new(),
        };

        self.populate_pipeline(&mut rule, config)?;

        if rule.authenticators.is_empty() {
            return Err(PipelineError::configuration(format!(
                "rule {:?} configures no authenticator",
                config.id
            )));
        }

        rule.error_handlers = self.build_error_handlers(&config.id, &config.on_error)?;

        Ok(rule)
    }

    /// Build the default rule; it matches when nothing else does
    pub fn build_default_rule(&self, config: &DefaultRuleConfig) -> PipelineResult<Rule> {
        let rule_config = RuleConfig {
            id: "default".to_string(),
            matcher: crate::rules::config::MatcherConfig {
                path: "/".to_string(),
                ..Default::default()
            },
            backend: None,
            execute: config.execute.clone(),
            on_error: config.on_error.clone(),
        };
        self.build_rule(&rule_config, None)
    }

    fn populate_pipeline(&self, rule: &mut Rule, config: &RuleConfig) -> PipelineResult<()> {
        for step in &config.execute {
            let override_config = step.config.as_ref();
            match step.step_ref(&config.id)? {
                StepRef::Authenticator(id) => {
                    let prototype = MechanismRegistry::lookup(
                        "authenticator",
                        &self.registry.authenticators,
                        id,
                    )?;
                    rule.authenticators
                        .push(prototype.override_with(override_config)?);
                }
                StepRef::Contextualizer(id) => {
                    let prototype = MechanismRegistry::lookup(
                        "contextualizer",
                        &self.registry.contextualizers,
                        id,
                    )?;
                    rule.contextualizers
                        .push(prototype.override_with(override_config)?);
                }
                StepRef::Authorizer(id) => {
                    let prototype =
                        MechanismRegistry::lookup("authorizer", &self.registry.authorizers, id)?;
                    rule.authorizers
                        .push(prototype.override_with(override_config)?);
                }
                StepRef::Finalizer(id) => {
                    let prototype =
                        MechanismRegistry::lookup("finalizer", &self.registry.finalizers, id)?;
                    rule.finalizers
                        .push(prototype.override_with(override_config)?);
                }
            }
        }
        Ok(())
    }

    fn build_error_handlers(
        &self,
        rule_id: &str,
        steps: &[ErrorStepConfig],
    ) -> PipelineResult<Vec<ConditionalErrorHandler>> {
        let mut handlers = Vec::with_capacity(steps.len());
        for step in steps {
            let prototype = MechanismRegistry::lookup(
                "error handler",
                &self.registry.error_handlers,
                &step.error_handler,
            )
            .map_err(|e| {
                PipelineError::configuration(format!(
                    "rule {rule_id:?}: {}",
                    e.message()
                ))
            })?;

            let condition = step
                .condition
                .as_deref()
                .map(Expression::new)
                .transpose()?;

            handlers.push(ConditionalErrorHandler {
                condition,
                handler: prototype.override_with(step.config.as_ref())?,
            });
        }
        Ok(handlers)
    }
}
