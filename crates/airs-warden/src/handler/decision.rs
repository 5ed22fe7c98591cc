//! Decision Service
//!
//! Evaluates the rule pipeline for requests described by an external
//! reverse proxy and answers with the policy decision: `200` with the
//! finalized upstream headers on allow, or the error handler's response on
//! deny.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::warn;

// Layer 3: Internal module imports
use crate::handler::{denied_response, plain_status, request_info_from};
use crate::rules::{Outcome, RuleExecutor};

#[derive(Clone)]
struct DecisionState {
    executor: Arc<RuleExecutor>,
    timeout: Duration,
}

/// Build the decision service router
pub fn router(executor: Arc<RuleExecutor>, timeout: Duration) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(DecisionState { executor, timeout })
}

async fn handle(State(state): State<DecisionState>, request: Request) -> Response {
    let info = match request_info_from(request, true).await {
        Ok(info) => info,
        Err(error) => {
            warn!(%error, "failed to read the request");
            return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let cancellation = CancellationToken::new();

    let outcome = tokio::select! {
        outcome = state.executor.execute(info, cancellation.clone()) => outcome,
        _ = tokio::time::sleep(state.timeout) => {
            cancellation.cancel();
            warn!("pipeline evaluation timed out");
            return plain_status(StatusCode::BAD_GATEWAY);
        }
    };

    match outcome {
        Outcome::Allowed(allowed) => {
            let mut builder = Response::builder().status(StatusCode::OK);

            for (name, value) in &allowed.upstream_headers {
                builder = builder.header(name, value);
            }
            if !allowed.upstream_cookies.is_empty() {
                let cookies: Vec<String> = allowed
                    .upstream_cookies
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                builder = builder.header(http::header::COOKIE, cookies.join("; "));
            }

            builder
                .body(Body::from(Bytes::new()))
                .unwrap_or_else(|_| plain_status(StatusCode::INTERNAL_SERVER_ERROR))
        }
        Outcome::Denied(denied) => denied_response(denied),
    }
}
