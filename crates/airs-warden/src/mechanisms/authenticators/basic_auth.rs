//! HTTP Basic Auth Authenticator

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::authenticators::{Authenticator, AUTHENTICATOR_BASIC_AUTH};
use crate::mechanisms::parse_config;
use crate::pipeline::{PipelineContext, Subject};

#[derive(Debug, Clone, Deserialize)]
struct BasicAuthConfig {
    user_id: String,
    password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct BasicAuthOverride {
    #[serde(default)]
    user_id: Option<String>,

    #[serde(default)]
    password: Option<String>,
}

/// Validates `Authorization: Basic` credentials against a configured pair
///
/// Only credential digests are kept in memory; comparison is constant time
/// over the digests.
#[derive(Debug, Clone)]
pub struct BasicAuthAuthenticator {
    id: String,
    user_id: [u8; 32],
    password: [u8; 32],
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl BasicAuthAuthenticator {
    pub(crate) fn create(
        _app: &AppContext,
        id: &str,
        config: Option<&Value>,
    ) -> PipelineResult<Arc<dyn Authenticator>> {
        let config: BasicAuthConfig = parse_config(AUTHENTICATOR_BASIC_AUTH, id, config)?;

        Ok(Arc::new(Self {
            id: id.to_string(),
            user_id: digest(&config.user_id),
            password: digest(&config.password),
        }))
    }
}

#[async_trait]
impl Authenticator for BasicAuthAuthenticator {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        AUTHENTICATOR_BASIC_AUTH
    }

    async fn authenticate(&self, ctx: &PipelineContext) -> PipelineResult<Subject> {
        let header = ctx
            .request()
            .header("Authorization")
            .ok_or_else(|| PipelineError::authentication("expected header not present"))?;

        let encoded = header.strip_prefix("Basic ").ok_or_else(|| {
            PipelineError::authentication("unexpected authentication scheme")
        })?;

        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|raw| String::from_utf8(raw).ok())
            .ok_or_else(|| {
                PipelineError::authentication("malformed Authorization header value")
            })?;

        let (user_id, password) = decoded.split_once(':').ok_or_else(|| {
            PipelineError::authentication("malformed Authorization header value")
        })?;

        let user_ok = digests_match(&digest(user_id), &self.user_id);
        let password_ok = digests_match(&digest(password), &self.password);

        if !(user_ok && password_ok) {
            return Err(PipelineError::authentication("invalid credentials"));
        }

        Ok(Subject::new(user_id))
    }

    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>> {
        let Some(config) = config else {
            return Ok(Arc::new(self.clone()));
        };

        let overrides: BasicAuthOverride =
            parse_config(AUTHENTICATOR_BASIC_AUTH, &self.id, Some(config))?;

        Ok(Arc::new(Self {
            id: self.id.clone(),
            user_id: overrides
                .user_id
                .as_deref()
                .map(digest)
                .unwrap_or(self.user_id),
            password: overrides
                .password
                .as_deref()
                .map(digest)
                .unwrap_or(self.password),
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::RequestInfo;

    fn authenticator() -> Arc<dyn Authenticator> {
        let app = AppContext::create().unwrap();
        BasicAuthAuthenticator::create(
            &app,
            "basic",
            Some(&json!({"user_id": "user", "password": "secret"})),
        )
        .unwrap()
    }

    fn ctx_with_credentials(user: &str, password: &str) -> PipelineContext {
        let encoded = STANDARD.encode(format!("{user}:{password}"));
        PipelineContext::new(
            RequestInfo::new("GET", "http", "test.local", "/")
                .with_header("Authorization", &format!("Basic {encoded}")),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_valid_credentials_yield_the_user_as_subject() {
        let subject = authenticator()
            .authenticate(&ctx_with_credentials("user", "secret"))
            .await
            .unwrap();
        assert_eq!(subject.id, "user");
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let err = authenticator()
            .authenticate(&ctx_with_credentials("user", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.message().contains("invalid credentials"));
    }

    #[tokio::test]
    async fn test_missing_header_is_rejected() {
        let ctx = PipelineContext::new(
            RequestInfo::new("GET", "http", "test.local", "/"),
            CancellationToken::new(),
        );
        let err = authenticator().authenticate(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.message().contains("expected header not present"));
    }

    #[tokio::test]
    async fn test_non_basic_scheme_is_rejected() {
        let ctx = PipelineContext::new(
            RequestInfo::new("GET", "http", "test.local", "/")
                .with_header("Authorization", "Bearer some-token"),
            CancellationToken::new(),
        );
        let err = authenticator().authenticate(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_missing_config_is_a_configuration_error() {
        let app = AppContext::create().unwrap();
        let err = BasicAuthAuthenticator::create(&app, "basic", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_override_replaces_credentials() {
        let prototype = authenticator();
        let instance = prototype
            .override_with(Some(&json!({"password": "other"})))
            .unwrap();

        assert!(instance
            .authenticate(&ctx_with_credentials("user", "other"))
            .await
            .is_ok());
        assert!(instance
            .authenticate(&ctx_with_credentials("user", "secret"))
            .await
            .is_err());
        // the prototype is unchanged
        assert!(prototype
            .authenticate(&ctx_with_credentials("user", "secret"))
            .await
            .is_ok());
    }
}
