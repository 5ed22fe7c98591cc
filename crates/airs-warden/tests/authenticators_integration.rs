//! Authenticator Integration Tests
//!
//! JWT verification against a mock JWKS, metadata-driven discovery, token
//! introspection and userinfo resolution.

mod common;

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Layer 3: Internal module imports
use airs_warden::app::AppContext;
use airs_warden::error::ErrorKind;
use airs_warden::mechanisms::authenticators::{create_prototype, Authenticator};
use airs_warden::pipeline::{PipelineContext, RequestInfo};

fn bearer_ctx(token: &str) -> PipelineContext {
    PipelineContext::new(
        RequestInfo::new("GET", "http", "test.local", "/api")
            .with_header("Authorization", &format!("Bearer {token}")),
        CancellationToken::new(),
    )
}

fn jwt_authenticator(jwks_url: &str, issuer: &str) -> Arc<dyn Authenticator> {
    let app = AppContext::create().unwrap();
    create_prototype(
        &app,
        "jwt_auth",
        "jwt",
        Some(&json!({
            "jwks_endpoint": {"url": jwks_url},
            "issuer": issuer,
            "assertions": {"audience": ["my-api"], "scopes": ["read"]},
        })),
    )
    .unwrap()
}

#[tokio::test]
async fn test_jwt_happy_path() {
    let keys = common::test_keys();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys.jwks_response.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let issuer = "https://auth.test";
    let auth = jwt_authenticator(&format!("{}/jwks", server.uri()), issuer);

    let token = common::sign_token(&keys, &common::claims(issuer, "alice"));
    let subject = auth.authenticate(&bearer_ctx(&token)).await.unwrap();

    assert_eq!(subject.id, "alice");
    assert_eq!(subject.attributes["iss"], json!(issuer));
}

#[tokio::test]
async fn test_jwt_expired_token_is_rejected() {
    let keys = common::test_keys();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys.jwks_response.clone()))
        .mount(&server)
        .await;

    let issuer = "https://auth.test";
    let auth = jwt_authenticator(&format!("{}/jwks", server.uri()), issuer);

    let mut claims = common::claims(issuer, "alice");
    claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
    let token = common::sign_token(&keys, &claims);

    let err = auth.authenticate(&bearer_ctx(&token)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_jwt_wrong_issuer_is_rejected() {
    let keys = common::test_keys();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys.jwks_response.clone()))
        .mount(&server)
        .await;

    let auth = jwt_authenticator(&format!("{}/jwks", server.uri()), "https://auth.test");

    let token = common::sign_token(&keys, &common::claims("https://evil.test", "alice"));
    let err = auth.authenticate(&bearer_ctx(&token)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_jwt_issued_in_the_future_is_rejected() {
    let keys = common::test_keys();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys.jwks_response.clone()))
        .mount(&server)
        .await;

    let issuer = "https://auth.test";
    let auth = jwt_authenticator(&format!("{}/jwks", server.uri()), issuer);

    // nbf and exp frame a currently valid window, but iat lies well beyond
    // the configured leeway
    let mut claims = common::claims(issuer, "alice");
    claims["iat"] = json!(chrono::Utc::now().timestamp() + 3600);
    let token = common::sign_token(&keys, &claims);

    let err = auth.authenticate(&bearer_ctx(&token)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.message().contains("issued in the future"));
}

#[tokio::test]
async fn test_jwt_missing_required_scope_is_rejected() {
    let keys = common::test_keys();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys.jwks_response.clone()))
        .mount(&server)
        .await;

    let issuer = "https://auth.test";
    let auth = jwt_authenticator(&format!("{}/jwks", server.uri()), issuer);

    let mut claims = common::claims(issuer, "alice");
    claims["scope"] = json!("write");
    let token = common::sign_token(&keys, &claims);

    let err = auth.authenticate(&bearer_ctx(&token)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_jwt_unknown_kid_triggers_exactly_one_refetch() {
    let keys = common::test_keys();
    let server = MockServer::start().await;
    // both the initial fetch and the rotation refetch serve a JWKS without
    // the token's kid
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
        .expect(2)
        .mount(&server)
        .await;

    let issuer = "https://auth.test";
    let auth = jwt_authenticator(&format!("{}/jwks", server.uri()), issuer);

    let token = common::sign_token(&keys, &common::claims(issuer, "alice"));
    let err = auth.authenticate(&bearer_ctx(&token)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.message().contains("no key with kid"));
}

#[tokio::test]
async fn test_jwt_discovers_the_jwks_via_server_metadata() {
    let keys = common::test_keys();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "jwks_uri": format!("{}/jwks", server.uri()),
            "token_endpoint_auth_signing_alg_values_supported": ["RS256"],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys.jwks_response.clone()))
        .mount(&server)
        .await;

    let app = AppContext::create().unwrap();
    let auth = create_prototype(
        &app,
        "jwt_auth",
        "jwt",
        Some(&json!({
            "metadata_endpoint": {
                "url": format!("{}/.well-known/oauth-authorization-server", server.uri()),
            },
            "assertions": {"audience": ["my-api"]},
        })),
    )
    .unwrap();

    let token = common::sign_token(&keys, &common::claims(&server.uri(), "alice"));
    let subject = auth.authenticate(&bearer_ctx(&token)).await.unwrap();
    assert_eq!(subject.id, "alice");
}

#[tokio::test]
async fn test_introspection_active_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("token=opaque-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "iss": "https://auth.test",
            "sub": "alice",
            "aud": "my-api",
            "exp": chrono::Utc::now().timestamp() + 300,
            "scope": "read",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = AppContext::create().unwrap();
    let auth = create_prototype(
        &app,
        "introspect",
        "oauth2_introspection",
        Some(&json!({
            "introspection_endpoint": {
                "url": format!("{}/introspect", server.uri()),
                "method": "POST",
                "headers": {"Content-Type": "application/x-www-form-urlencoded"},
            },
            "issuer": "https://auth.test",
            "assertions": {"audience": ["my-api"]},
        })),
    )
    .unwrap();

    let subject = auth
        .authenticate(&bearer_ctx("opaque-token"))
        .await
        .unwrap();
    assert_eq!(subject.id, "alice");
}

#[tokio::test]
async fn test_introspection_inactive_token_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
        .expect(1)
        .mount(&server)
        .await;

    let app = AppContext::create().unwrap();
    let auth = create_prototype(
        &app,
        "introspect",
        "oauth2_introspection",
        Some(&json!({
            "introspection_endpoint": {
                "url": format!("{}/introspect", server.uri()),
                "method": "POST",
            },
        })),
    )
    .unwrap();

    let err = auth
        .authenticate(&bearer_ctx("opaque-token"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.message().contains("not active"));
}

#[tokio::test]
async fn test_userinfo_resolves_the_subject() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("Authorization", "Bearer opaque-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "alice",
            "email": "alice@example.com",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = AppContext::create().unwrap();
    let auth = create_prototype(
        &app,
        "userinfo",
        "oidc_userinfo",
        Some(&json!({
            "userinfo_endpoint": {"url": format!("{}/userinfo", server.uri())},
        })),
    )
    .unwrap();

    let subject = auth
        .authenticate(&bearer_ctx("opaque-token"))
        .await
        .unwrap();
    assert_eq!(subject.id, "alice");
    assert_eq!(subject.attributes["email"], json!("alice@example.com"));
}

#[tokio::test]
async fn test_userinfo_rejected_token_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let app = AppContext::create().unwrap();
    let auth = create_prototype(
        &app,
        "userinfo",
        "oidc_userinfo",
        Some(&json!({
            "userinfo_endpoint": {"url": format!("{}/userinfo", server.uri())},
        })),
    )
    .unwrap();

    let err = auth
        .authenticate(&bearer_ctx("opaque-token"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}
