//! Authenticators
//!
//! An authenticator establishes the [`Subject`] of a request. Authenticators
//! configured for a rule run in order; the first success wins, and a failing
//! authenticator only falls through to the next one when it failed with an
//! authentication error.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::app::AppContext;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::pipeline::{PipelineContext, Subject};

mod anonymous;
mod basic_auth;
mod extractors;
mod generic;
mod jwt;
mod oauth2_introspection;
mod oidc_userinfo;

pub use anonymous::AnonymousAuthenticator;
pub use basic_auth::BasicAuthAuthenticator;
pub use extractors::TokenSource;
pub use generic::GenericAuthenticator;
pub use jwt::JwtAuthenticator;
pub use oauth2_introspection::OAuth2IntrospectionAuthenticator;
pub use oidc_userinfo::OidcUserinfoAuthenticator;

pub const AUTHENTICATOR_ANONYMOUS: &str = "anonymous";
pub const AUTHENTICATOR_BASIC_AUTH: &str = "basic_auth";
pub const AUTHENTICATOR_GENERIC: &str = "generic";
pub const AUTHENTICATOR_JWT: &str = "jwt";
pub const AUTHENTICATOR_OAUTH2_INTROSPECTION: &str = "oauth2_introspection";
pub const AUTHENTICATOR_OIDC_USERINFO: &str = "oidc_userinfo";

/// Establishes the subject of a request
#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> &'static str;

    async fn authenticate(&self, ctx: &PipelineContext) -> PipelineResult<Subject>;

    /// Specialize this prototype for a rule
    fn override_with(&self, config: Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>>;
}

type AuthenticatorFactory =
    fn(&AppContext, &str, Option<&Value>) -> PipelineResult<Arc<dyn Authenticator>>;

pub(crate) const AUTHENTICATOR_FACTORIES: &[(&str, AuthenticatorFactory)] = &[
    (AUTHENTICATOR_ANONYMOUS, AnonymousAuthenticator::create),
    (AUTHENTICATOR_BASIC_AUTH, BasicAuthAuthenticator::create),
    (AUTHENTICATOR_GENERIC, GenericAuthenticator::create),
    (AUTHENTICATOR_JWT, JwtAuthenticator::create),
    (
        AUTHENTICATOR_OAUTH2_INTROSPECTION,
        OAuth2IntrospectionAuthenticator::create,
    ),
    (AUTHENTICATOR_OIDC_USERINFO, OidcUserinfoAuthenticator::create),
];

/// Error value for unknown authenticator kinds
pub fn unsupported_authenticator_type(kind: &str) -> PipelineError {
    PipelineError::new(
        ErrorKind::UnsupportedType,
        format!("unsupported authenticator type {kind:?}"),
    )
}

/// Create an authenticator prototype for the given kind
pub fn create_prototype(
    app: &AppContext,
    id: &str,
    kind: &str,
    config: Option<&Value>,
) -> PipelineResult<Arc<dyn Authenticator>> {
    match AUTHENTICATOR_FACTORIES.iter().find(|(name, _)| *name == kind) {
        Some((_, factory)) => factory(app, id, config),
        None => Err(unsupported_authenticator_type(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // there are six authenticators implemented, which should have been registered
    #[test]
    fn test_all_authenticator_types_are_registered() {
        assert_eq!(AUTHENTICATOR_FACTORIES.len(), 6);
    }

    #[test]
    fn test_create_prototype_using_known_type() {
        let app = AppContext::create().unwrap();

        let auth = create_prototype(&app, "foo", AUTHENTICATOR_ANONYMOUS, None).unwrap();

        assert_eq!(auth.kind(), AUTHENTICATOR_ANONYMOUS);
        assert_eq!(auth.id(), "foo");
    }

    #[test]
    fn test_create_prototype_using_unknown_type() {
        let app = AppContext::create().unwrap();

        let err = create_prototype(&app, "foo", "unknown_kind", None).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(
            err.to_string(),
            unsupported_authenticator_type("unknown_kind").to_string()
        );
    }

    #[test]
    fn test_every_registered_kind_creates_a_prototype_of_that_kind() {
        let app = AppContext::create().unwrap();
        let config = serde_json::json!({
            "user_id": "user",
            "password": "secret",
            "identity_info_endpoint": {"url": "https://id.test/info"},
            "userinfo_endpoint": {"url": "https://id.test/userinfo"},
            "jwks_endpoint": {"url": "https://id.test/jwks"},
            "issuer": "https://id.test",
            "introspection_endpoint": {"url": "https://id.test/introspect"},
        });

        for (kind, _) in AUTHENTICATOR_FACTORIES {
            let auth = create_prototype(&app, "test", kind, Some(&config))
                .unwrap_or_else(|e| panic!("failed to create {kind}: {e}"));
            assert_eq!(auth.kind(), *kind);
        }
    }
}
