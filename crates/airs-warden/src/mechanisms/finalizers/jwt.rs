//! JWT Minting Finalizer

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

// Layer 3: Internal module imports
use crate::app::keys::KeyRegistry;
use crate::app::AppContext;
use crate::cache::TtlCache;
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::finalizers::{Finalizer, FINALIZER_JWT};
use crate::mechanisms::parse_config_or_default;
use crate::pipeline::PipelineContext;
use crate::template::Template;

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_header_name() -> String {
    "Authorization".to_string()
}

fn default_header_scheme() -> String {
    "Bearer".to_string()
}

/// Safety margin subtracted from a minted token's lifetime when caching it
const MINT_CACHE_SKEW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
struct JwtFinalizerConfig {
    /// Signer to use; defaults to the registry's default signer
    #[serde(default)]
    signer: Option<String>,

    #[serde(default = "default_ttl")]
    ttl: Duration,

    /// Template rendering a JSON object of additional claims
    #[serde(default)]
    claims: Option<String>,

    #[serde(default = "default_header_name")]
    header_name: String,

    #[serde(default = "default_header_scheme")]
    header_scheme: String,
}

impl Default for JwtFinalizerConfig {
    fn default() -> Self {
        Self {
            signer: None,
            ttl: default_ttl(),
            claims: None,
            header_name: default_header_name(),
            header_scheme: default_header_scheme(),
        }
    }
}

/// Mints a signed JWT for the authenticated subject and places it on the
/// upstream request
///
/// Minted tokens are cached per subject and claims until shortly before
/// their expiry.
#[derive(Debug, Clone)]
pub struct JwtFinalizer {
    id: String,
    key_registry: Arc<KeyRegistry>,
    signer: Option<String>,
    ttl: Duration,
    claims: Option<String>,
    header_name: String,
    header_scheme: String,
    minted: Arc<TtlCache<String>>,
}

impl JwtFinalizer {
    pub(crate) fn create(
        app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Finalizer>> {
        let config: JwtFinalizerConfig = parse_config_or_default(FINALIZER_JWT, id, config)?;
        if let Some(claims) = &config.claims {
            Template::new(claims)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        }

        Ok(Arc::new(Self {
            id: id.to_string(),
            key_registry: Arc::clone(app.key_registry()),
            signer: config.signer,
            ttl: config.ttl,
            claims: config.claims,
            header_name: config.header_name,
            header_scheme: config.header_scheme,
            minted: Arc::new(TtlCache::default()),
        }))
    }

    fn custom_claims(&self, values: &Value) -> PipelineResult<Map<String, Value>> {
        let Some(template) = &self.claims else {
            return Ok(Map::new());
        };

        let rendered = Template::new(template).and_then(|t| t.render(values))?;
        match serde_json::from_str(&rendered) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(PipelineError::configuration(format!(
                "claims template of jwt finalizer {:?} does not render a JSON object",
                self.id
            ))),
            Err(e) => Err(PipelineError::configuration(format!(
                "claims template of jwt finalizer {:?} does not render valid JSON",
                self.id
            ))
            .with_source(e)),
        }
    }
}

#[async_trait]
impl Finalizer for JwtFinalizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        FINALIZER_JWT
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let subject = ctx
            .subject()
            .ok_or_else(|| PipelineError::internal("no subject present to mint a token for"))?
            .clone();

        let values = ctx.template_values();
        let custom = self.custom_claims(&values)?;

        let cache_key = {
            let mut digest = Sha256::new();
            digest.update(self.id.as_bytes());
            digest.update(subject.id.as_bytes());
            digest.update(serde_json::to_vec(&custom).unwrap_or_default());
            format!("jwt:{:x}", digest.finalize())
        };

        let token = match self.minted.get(&cache_key) {
            Some(token) => token,
            None => {
                let signer = self.key_registry.signer(self.signer.as_deref())?;

                let now = Utc::now().timestamp();
                let mut claims = custom;
                claims.insert("sub".to_string(), Value::String(subject.id.clone()));
                claims.insert("iat".to_string(), Value::from(now));
                claims.insert("nbf".to_string(), Value::from(now));
                claims.insert(
                    "exp".to_string(),
                    Value::from(now + self.ttl.as_secs() as i64),
                );

                let token = signer.sign(&Value::Object(claims))?;
                self.minted.put(
                    &cache_key,
                    token.clone(),
                    self.ttl.saturating_sub(MINT_CACHE_SKEW),
                );

                debug!(finalizer = %self.id, subject = %subject.id, "minted upstream token");
                token
            }
        };

        let value = if self.header_scheme.is_empty() {
            token
        } else {
            format!("{} {token}", self.header_scheme)
        };
        ctx.add_header_for_upstream(&self.header_name, &value)
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Finalizer>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: JwtFinalizerConfig =
            parse_config_or_default(FINALIZER_JWT, &self.id, Some(config))?;
        if let Some(claims) = &overrides.claims {
            Template::new(claims)
                .map_err(|e| PipelineError::configuration(e.message().to_string()))?;
        }

        Ok(Arc::new(Self {
            id: self.id.clone(),
            key_registry: Arc::clone(&self.key_registry),
            signer: overrides.signer.or_else(|| self.signer.clone()),
            ttl: overrides.ttl,
            claims: overrides.claims.or_else(|| self.claims.clone()),
            header_name: overrides.header_name,
            header_scheme: overrides.header_scheme,
            minted: Arc::new(TtlCache::default()),
        }))
    }
}
