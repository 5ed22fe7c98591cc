//! Application Assembly and Lifecycle
//!
//! Explicit startup sequence: load the configuration, build the mechanism
//! registry and the rule set, then start the listeners. `start` runs until
//! the cancellation token fires; there is no dependency injection graph.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio_util::sync::CancellationToken;
use tracing::info;

// Layer 3: Internal module imports
use crate::endpoint::HttpClient;
use crate::error::{PipelineError, PipelineResult};
use crate::handler::{decision, management, proxy};
use crate::rules::{
    MechanismRegistry, RuleExecutor, RuleFactory, RuleRepository, RuleSet, RuleSetDocument,
};

pub mod config;
pub mod context;
pub mod keys;

pub use config::{Config, ListenConfig, ServeConfig};
pub use context::AppContext;
pub use keys::{KeyRegistry, Signer, SignerConfig};

/// How the gateway is operated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    /// Answer policy decisions for an external reverse proxy
    Decision,

    /// Forward allowed requests to the rule's backend
    Proxy,
}

/// The assembled gateway
pub struct App {
    context: AppContext,
    config: Config,
    mode: OperationMode,
    repository: Arc<RuleRepository>,
    executor: Arc<RuleExecutor>,
}

impl App {
    /// Build the mechanism registry and the rule set from the configuration
    pub fn bootstrap(config: Config, mode: OperationMode) -> PipelineResult<Self> {
        let key_registry = Arc::new(KeyRegistry::from_config(&config.signers)?);
        let context = AppContext::new(Arc::new(HttpClient::new()?), key_registry);

        let rule_set = Self::load_rule_set(&context, &config)?;
        info!(rules = rule_set.len(), ?mode, "rule set loaded");

        let repository = Arc::new(RuleRepository::new(rule_set));
        let executor = Arc::new(RuleExecutor::new(Arc::clone(&repository)));

        Ok(Self {
            context,
            config,
            mode,
            repository,
            executor,
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn executor(&self) -> Arc<RuleExecutor> {
        Arc::clone(&self.executor)
    }

    /// Rebuild the rule set from a new configuration and publish it
    ///
    /// This is the entry point for the external configuration watcher;
    /// in-flight requests keep their current snapshot.
    pub fn reload_rules(&self, config: &Config) -> PipelineResult<()> {
        let rule_set = Self::load_rule_set(&self.context, config)?;
        info!(rules = rule_set.len(), "publishing new rule set snapshot");
        self.repository.swap(rule_set);
        Ok(())
    }

    fn load_rule_set(context: &AppContext, config: &Config) -> PipelineResult<RuleSet> {
        let registry = MechanismRegistry::from_catalogue(context, &config.mechanisms)?;
        let factory = RuleFactory::new(registry);

        let mut rules = Vec::new();
        for rule_config in &config.rules {
            rules.push(Arc::new(factory.build_rule(rule_config, None)?));
        }

        for path in &config.rule_files {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                PipelineError::configuration(format!(
                    "failed to read rule file {}",
                    path.display()
                ))
                .with_source(e)
            })?;
            let document: RuleSetDocument = serde_yml::from_str(&raw).map_err(|e| {
                PipelineError::configuration(format!(
                    "failed to parse rule file {}",
                    path.display()
                ))
                .with_source(e)
            })?;

            let src_file = path.display().to_string();
            for rule_config in &document.rules {
                rules.push(Arc::new(factory.build_rule(rule_config, Some(&src_file))?));
            }
        }

        let default_rule = config
            .default_rule
            .as_ref()
            .map(|default_config| factory.build_default_rule(default_config))
            .transpose()?
            .map(Arc::new);

        RuleSet::new(rules, default_rule)
    }

    /// Serve until the cancellation token fires
    pub async fn start(&self, cancellation: CancellationToken) -> PipelineResult<()> {
        let (service_name, address, router) = match self.mode {
            OperationMode::Decision => (
                "decision",
                self.config.serve.decision.address(),
                decision::router(self.executor(), self.config.pipeline_timeout),
            ),
            OperationMode::Proxy => (
                "proxy",
                self.config.serve.proxy.address(),
                proxy::router(
                    self.executor(),
                    Arc::clone(self.context.http_client()),
                    self.config.pipeline_timeout,
                ),
            ),
        };

        let service = serve(service_name, address, router, cancellation.clone());

        match &self.config.management {
            Some(listen) => {
                let management_router =
                    management::router(Arc::clone(self.context.key_registry()));
                let management = serve(
                    "management",
                    listen.address(),
                    management_router,
                    cancellation,
                );
                tokio::try_join!(service, management).map(|_| ())
            }
            None => service.await,
        }
    }
}

async fn serve(
    name: &str,
    address: String,
    router: axum::Router,
    cancellation: CancellationToken,
) -> PipelineResult<()> {
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        PipelineError::configuration(format!("failed to bind {name} service to {address}"))
            .with_source(e)
    })?;

    info!(service = name, %address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancellation.cancelled().await })
        .await
        .map_err(|e| {
            PipelineError::internal(format!("{name} service failed")).with_source(e)
        })?;

    info!(service = name, "stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config::from_yaml(
            r#"
            mechanisms:
              authenticators:
                - id: anon
                  type: anonymous
            rules:
              - id: rule:anything
                match:
                  path: /anything
                execute:
                  - authenticator: anon
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_builds_the_rule_set() {
        let app = App::bootstrap(minimal_config(), OperationMode::Decision).unwrap();
        assert_eq!(app.repository.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_publishes_a_new_snapshot() {
        let app = App::bootstrap(minimal_config(), OperationMode::Decision).unwrap();

        let mut updated = minimal_config();
        updated.rules.push(
            serde_json::from_value(serde_json::json!({
                "id": "rule:other",
                "match": {"path": "/other"},
                "execute": [{"authenticator": "anon"}],
            }))
            .unwrap(),
        );

        app.reload_rules(&updated).unwrap();
        assert_eq!(app.repository.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_rule_files_are_loaded() {
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
            version: "1"
            rules:
              - id: rule:from-file
                match:
                  path: /from-file
                execute:
                  - authenticator: anon
            "#,
        )
        .unwrap();

        let mut config = minimal_config();
        config.rule_files.push(file.path().to_path_buf());

        let app = App::bootstrap(config, OperationMode::Decision).unwrap();
        let snapshot = app.repository.snapshot();
        assert_eq!(snapshot.len(), 2);

        let request = crate::pipeline::RequestInfo::new("GET", "http", "test.local", "/from-file");
        let (rule, _) = snapshot.find(&request).unwrap();
        assert_eq!(rule.id, "rule:from-file");
        assert!(rule.src_file.is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_broken_references() {
        let mut config = minimal_config();
        config.rules[0].execute[0].authenticator = Some("missing".to_string());

        let err = App::bootstrap(config, OperationMode::Decision).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
