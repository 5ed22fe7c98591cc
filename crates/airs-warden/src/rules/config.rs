//! Rule Configuration Documents

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

/// One rule as configured
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub id: String,

    #[serde(rename = "match")]
    pub matcher: MatcherConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,

    pub execute: Vec<PipelineStepConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_error: Vec<ErrorStepConfig>,
}

/// Request constraints of a rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatcherConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    pub path: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
}

/// One `execute` pipeline entry; exactly one mechanism reference must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineStepConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contextualizer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// A resolved `execute` entry
#[derive(Debug, Clone, PartialEq)]
pub enum StepRef<'a> {
    Authenticator(&'a str),
    Contextualizer(&'a str),
    Authorizer(&'a str),
    Finalizer(&'a str),
}

impl PipelineStepConfig {
    /// Which mechanism this step references
    pub fn step_ref(&self, rule_id: &str) -> PipelineResult<StepRef<'_>> {
        let refs = [
            self.authenticator.as_deref().map(StepRef::Authenticator),
            self.contextualizer.as_deref().map(StepRef::Contextualizer),
            self.authorizer.as_deref().map(StepRef::Authorizer),
            self.finalizer.as_deref().map(StepRef::Finalizer),
        ];

        let mut found = refs.into_iter().flatten();
        match (found.next(), found.next()) {
            (Some(step), None) => Ok(step),
            (Some(_), Some(_)) => Err(PipelineError::configuration(format!(
                "rule {rule_id:?} has an execute entry referencing more than one mechanism"
            ))),
            (None, _) => Err(PipelineError::configuration(format!(
                "rule {rule_id:?} has an execute entry referencing no mechanism"
            ))),
        }
    }
}

/// One `on_error` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorStepConfig {
    pub error_handler: String,

    /// Condition expression; an absent condition always matches
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Upstream backend of a rule (proxy mode)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<RewriteConfig>,
}

/// URL rewriting applied when forwarding to the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_path_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_path_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip_query_parameters: Vec<String>,
}

/// A rule file: a versioned list of rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetDocument {
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub rules: Vec<RuleConfig>,
}

/// The default rule applied when no other rule matches; it has no matcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultRuleConfig {
    pub execute: Vec<PipelineStepConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_error: Vec<ErrorStepConfig>,
}
