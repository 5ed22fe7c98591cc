//! Rule Pipeline Integration Tests
//!
//! Exercises the executor end to end: authenticator fallback semantics,
//! ordered contextualization, AND-composed authorization, finalization and
//! error-handler routing, against mock upstream services.

mod common;

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Layer 3: Internal module imports
use airs_warden::app::{App, Config, OperationMode};
use airs_warden::pipeline::RequestInfo;
use airs_warden::rules::{Outcome, RuleExecutor};

fn bootstrap(value: Value) -> Arc<RuleExecutor> {
    let config: Config = serde_json::from_value(value).expect("valid configuration");
    App::bootstrap(config, OperationMode::Decision)
        .expect("bootstrap succeeds")
        .executor()
}

async fn execute(executor: &RuleExecutor, request: RequestInfo) -> Outcome {
    executor.execute(request, CancellationToken::new()).await
}

fn denied_status(outcome: Outcome) -> u16 {
    match outcome {
        Outcome::Denied(denied) => denied.status,
        Outcome::Allowed(allowed) => panic!("expected a denial, rule {} allowed", allowed.rule_id),
    }
}

#[tokio::test]
async fn test_anonymous_happy_path() {
    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [{"id": "anon", "type": "anonymous"}],
            "finalizers": [{
                "id": "forward_subject",
                "type": "header",
                "config": {"headers": {"X-User": "{{ .Subject.ID }}"}},
            }],
        },
        "rules": [{
            "id": "rule:anything",
            "match": {"path": "/anything"},
            "execute": [
                {"authenticator": "anon"},
                {"finalizer": "forward_subject"},
            ],
        }],
    }));

    let outcome = execute(
        &executor,
        RequestInfo::new("GET", "http", "test.local", "/anything"),
    )
    .await;

    match outcome {
        Outcome::Allowed(allowed) => {
            assert_eq!(allowed.rule_id, "rule:anything");
            assert_eq!(
                allowed.upstream_headers.get("X-User").unwrap().to_str().unwrap(),
                "anonymous"
            );
        }
        Outcome::Denied(denied) => panic!("expected allow, got status {}", denied.status),
    }
}

#[tokio::test]
async fn test_authenticator_fallback_on_authentication_errors() {
    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [
                {"id": "basic", "type": "basic_auth",
                 "config": {"user_id": "user", "password": "secret"}},
                {"id": "anon", "type": "anonymous", "config": {"subject": "fallback"}},
            ],
            "finalizers": [{
                "id": "forward_subject",
                "type": "header",
                "config": {"headers": {"X-User": "{{ .Subject.ID }}"}},
            }],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"path": "/api"},
            "execute": [
                {"authenticator": "basic"},
                {"authenticator": "anon"},
                {"finalizer": "forward_subject"},
            ],
        }],
    }));

    // no credentials; the basic authenticator fails with an authentication
    // error and the anonymous fallback wins
    let outcome = execute(
        &executor,
        RequestInfo::new("GET", "http", "test.local", "/api"),
    )
    .await;

    match outcome {
        Outcome::Allowed(allowed) => {
            assert_eq!(
                allowed.upstream_headers.get("X-User").unwrap().to_str().unwrap(),
                "fallback"
            );
        }
        Outcome::Denied(denied) => panic!("expected allow, got status {}", denied.status),
    }
}

#[tokio::test]
async fn test_non_authentication_error_aborts_without_fallback() {
    let server = MockServer::start().await;
    // the identity document lacks the `sub` claim the subject mapping needs
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uid": "x"})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [
                {"id": "broken", "type": "generic",
                 "config": {"identity_info_endpoint": {"url": format!("{}/identity", server.uri())}}},
                {"id": "anon", "type": "anonymous"},
            ],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"path": "/api"},
            "execute": [
                {"authenticator": "broken"},
                {"authenticator": "anon"},
            ],
        }],
    }));

    let outcome = execute(
        &executor,
        RequestInfo::new("GET", "http", "test.local", "/api")
            .with_header("Authorization", "Bearer opaque"),
    )
    .await;

    // the internal error aborts the chain; the anonymous authenticator is
    // not consulted
    assert_eq!(denied_status(outcome), 500);
}

#[tokio::test]
async fn test_contextualizers_run_in_declaration_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "A"})))
        .expect(1)
        .mount(&server)
        .await;
    // the second call only succeeds when the first contextualizer's output
    // is already present in the pipeline state
    Mock::given(method("POST"))
        .and(path("/second"))
        .and(body_string_contains("A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "B"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/third"))
        .and(body_string_contains("B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "C"})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [{"id": "anon", "type": "anonymous"}],
            "contextualizers": [
                {"id": "first", "type": "generic",
                 "config": {"endpoint": {"url": format!("{}/first", server.uri()), "method": "POST"},
                            "payload": "seed"}},
                {"id": "second", "type": "generic",
                 "config": {"endpoint": {"url": format!("{}/second", server.uri()), "method": "POST"},
                            "payload": "{{ .Outputs.first.value }}"}},
                {"id": "third", "type": "generic",
                 "config": {"endpoint": {"url": format!("{}/third", server.uri()), "method": "POST"},
                            "payload": "{{ .Outputs.second.value }}"}},
            ],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"path": "/api"},
            "execute": [
                {"authenticator": "anon"},
                {"contextualizer": "first"},
                {"contextualizer": "second"},
                {"contextualizer": "third"},
            ],
        }],
    }));

    let outcome = execute(
        &executor,
        RequestInfo::new("GET", "http", "test.local", "/api"),
    )
    .await;

    assert!(matches!(outcome, Outcome::Allowed(_)));
}

#[tokio::test]
async fn test_authorizers_are_and_composed() {
    let config = |second_authorizer: &str| {
        json!({
            "mechanisms": {
                "authenticators": [{"id": "anon", "type": "anonymous"}],
                "authorizers": [
                    {"id": "allow_all", "type": "allow"},
                    {"id": "deny_all", "type": "deny"},
                    {"id": "subject_is_anonymous", "type": "cel",
                     "config": {"expressions": [{"expression": "Subject.ID == \"anonymous\""}]}},
                ],
            },
            "rules": [{
                "id": "rule:test",
                "match": {"path": "/api"},
                "execute": [
                    {"authenticator": "anon"},
                    {"authorizer": "allow_all"},
                    {"authorizer": second_authorizer},
                ],
            }],
        })
    };

    let outcome = execute(
        &bootstrap(config("subject_is_anonymous")),
        RequestInfo::new("GET", "http", "test.local", "/api"),
    )
    .await;
    assert!(matches!(outcome, Outcome::Allowed(_)));

    let outcome = execute(
        &bootstrap(config("deny_all")),
        RequestInfo::new("GET", "http", "test.local", "/api"),
    )
    .await;
    assert_eq!(denied_status(outcome), 403);
}

#[tokio::test]
async fn test_first_matching_error_handler_wins() {
    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [
                {"id": "basic", "type": "basic_auth",
                 "config": {"user_id": "user", "password": "secret"}},
            ],
            "error_handlers": [
                {"id": "to_login", "type": "redirect",
                 "config": {"to": "https://login.test/?origin={{ .Request.URL | urlenc }}"}},
            ],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"path": "/api"},
            "execute": [{"authenticator": "basic"}],
            "on_error": [
                {"error_handler": "to_login", "if": "Error.Type == \"authentication_error\""},
            ],
        }],
    }));

    let outcome = execute(
        &executor,
        RequestInfo::new("GET", "https", "app.test", "/api"),
    )
    .await;

    match outcome {
        Outcome::Denied(denied) => {
            assert_eq!(denied.status, 302);
            assert_eq!(denied.headers[0].0, "Location");
            assert!(denied.headers[0].1.starts_with("https://login.test/"));
        }
        Outcome::Allowed(_) => panic!("expected a denial"),
    }
}

#[tokio::test]
async fn test_unmatched_errors_reach_the_default_handler() {
    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [{"id": "anon", "type": "anonymous"}],
            "authorizers": [{"id": "deny_all", "type": "deny"}],
            "error_handlers": [
                {"id": "to_login", "type": "redirect", "config": {"to": "https://login.test"}},
            ],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"path": "/api"},
            "execute": [
                {"authenticator": "anon"},
                {"authorizer": "deny_all"},
            ],
            "on_error": [
                {"error_handler": "to_login", "if": "Error.Type == \"authentication_error\""},
            ],
        }],
    }));

    // an authorization error does not match the redirect condition and
    // falls through to the built-in default handler
    let outcome = execute(
        &executor,
        RequestInfo::new("GET", "http", "test.local", "/api"),
    )
    .await;
    assert_eq!(denied_status(outcome), 403);
}

#[tokio::test]
async fn test_no_rule_and_method_not_allowed() {
    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [{"id": "anon", "type": "anonymous"}],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"methods": ["GET"], "path": "/api"},
            "execute": [{"authenticator": "anon"}],
        }],
    }));

    let outcome = execute(
        &executor,
        RequestInfo::new("GET", "http", "test.local", "/other"),
    )
    .await;
    assert_eq!(denied_status(outcome), 404);

    let outcome = execute(
        &executor,
        RequestInfo::new("DELETE", "http", "test.local", "/api"),
    )
    .await;
    assert_eq!(denied_status(outcome), 405);
}

#[tokio::test]
async fn test_concurrent_jwt_requests_share_one_jwks_fetch() {
    let keys = common::test_keys();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(keys.jwks_response.clone())
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let issuer = "https://auth.test";
    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [{
                "id": "jwt_auth",
                "type": "jwt",
                "config": {
                    "jwks_endpoint": {"url": format!("{}/jwks", server.uri())},
                    "issuer": issuer,
                    "assertions": {"audience": ["my-api"]},
                },
            }],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"path": "/api"},
            "execute": [{"authenticator": "jwt_auth"}],
        }],
    }));

    let mut handles = Vec::new();
    for i in 0..8 {
        let executor = Arc::clone(&executor);
        let token = common::sign_token(&keys, &common::claims(issuer, &format!("user-{i}")));
        handles.push(tokio::spawn(async move {
            let request = RequestInfo::new("GET", "http", "test.local", "/api")
                .with_header("Authorization", &format!("Bearer {token}"));
            matches!(
                executor.execute(request, CancellationToken::new()).await,
                Outcome::Allowed(_)
            )
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap(), "request should have been allowed");
    }
    // the mock's expect(1) verifies the singleflight on drop
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_endpoint_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"sub": "x"}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let executor = bootstrap(json!({
        "mechanisms": {
            "authenticators": [{
                "id": "slow", "type": "generic",
                "config": {"identity_info_endpoint": {"url": format!("{}/identity", server.uri())}},
            }],
        },
        "rules": [{
            "id": "rule:test",
            "match": {"path": "/api"},
            "execute": [{"authenticator": "slow"}],
        }],
    }));

    let cancellation = CancellationToken::new();
    let canceller = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let request = RequestInfo::new("GET", "http", "test.local", "/api")
        .with_header("Authorization", "Bearer opaque");
    let outcome = executor.execute(request, cancellation).await;

    // a cancelled endpoint call surfaces as a communication error
    assert_eq!(denied_status(outcome), 502);
    assert!(started.elapsed() < Duration::from_secs(5));
}
