//! Gateway Configuration Document

// Layer 1: Standard library imports
use std::path::{Path, PathBuf};
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::Deserialize;

// Layer 3: Internal module imports
use crate::app::keys::SignerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::rules::config::DefaultRuleConfig;
use crate::rules::{MechanismCatalogue, RuleConfig};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_pipeline_timeout() -> Duration {
    Duration::from_secs(30)
}

/// A listen address
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,
}

impl ListenConfig {
    fn with_port(port: u16) -> Self {
        Self {
            host: default_host(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Listen addresses of the decision and proxy services
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServeConfig {
    #[serde(default = "default_decision_listen")]
    pub decision: ListenConfig,

    #[serde(default = "default_proxy_listen")]
    pub proxy: ListenConfig,
}

fn default_decision_listen() -> ListenConfig {
    ListenConfig::with_port(4456)
}

fn default_proxy_listen() -> ListenConfig {
    ListenConfig::with_port(4455)
}

fn default_management_listen() -> Option<ListenConfig> {
    Some(ListenConfig::with_port(4457))
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            decision: default_decision_listen(),
            proxy: default_proxy_listen(),
        }
    }
}

/// The top-level YAML configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub serve: ServeConfig,

    /// Management service listen address; absent disables the service
    #[serde(default = "default_management_listen")]
    pub management: Option<ListenConfig>,

    #[serde(default)]
    pub signers: Vec<SignerConfig>,

    #[serde(default)]
    pub mechanisms: MechanismCatalogue,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Additional rule files, each a [`RuleSetDocument`](crate::rules::RuleSetDocument)
    #[serde(default)]
    pub rule_files: Vec<PathBuf>,

    #[serde(default)]
    pub default_rule: Option<DefaultRuleConfig>,

    /// Upper bound on one rule evaluation
    #[serde(default = "default_pipeline_timeout")]
    pub pipeline_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serve: ServeConfig::default(),
            management: default_management_listen(),
            signers: Vec::new(),
            mechanisms: MechanismCatalogue::default(),
            rules: Vec::new(),
            rule_files: Vec::new(),
            default_rule: None,
            pipeline_timeout: default_pipeline_timeout(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!(
                "failed to read configuration file {}",
                path.display()
            ))
            .with_source(e)
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> PipelineResult<Self> {
        serde_yml::from_str(raw).map_err(|e| {
            PipelineError::configuration("failed to parse the configuration document")
                .with_source(e)
        })
    }
}
