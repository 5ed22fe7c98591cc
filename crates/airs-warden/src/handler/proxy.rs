//! Proxy Service
//!
//! Evaluates the rule pipeline and, on allow, forwards the request to the
//! matched rule's backend with the finalized headers, relaying the
//! backend's response to the caller.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::endpoint::HttpClient;
use crate::error::{PipelineError, PipelineResult};
use crate::handler::{denied_response, plain_status, request_info_from};
use crate::pipeline::RequestInfo;
use crate::rules::{AllowedOutcome, Outcome, RuleExecutor};

/// Headers never forwarded between the caller and the backend
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

#[derive(Clone)]
struct ProxyState {
    executor: Arc<RuleExecutor>,
    client: Arc<HttpClient>,
    timeout: Duration,
}

/// Build the proxy service router
pub fn router(executor: Arc<RuleExecutor>, client: Arc<HttpClient>, timeout: Duration) -> Router {
    Router::new().fallback(handle).with_state(ProxyState {
        executor,
        client,
        timeout,
    })
}

async fn handle(State(state): State<ProxyState>, request: Request) -> Response {
    let info = match request_info_from(request, false).await {
        Ok(info) => info,
        Err(error) => {
            warn!(%error, "failed to read the request");
            return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let original = info.clone();

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
            match forward(&state, &original, &allowed, &cancellation).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(rule = %allowed.rule_id, %error, "forwarding to the backend failed");
                    plain_status(StatusCode::BAD_GATEWAY)
                }
            }
        }
        Outcome::Denied(denied) => denied_response(denied),
    }
}

async fn forward(
    state: &ProxyState,
    original: &RequestInfo,
    allowed: &AllowedOutcome,
    cancellation: &CancellationToken,
) -> PipelineResult<Response> {
    let backend = allowed.backend.as_ref().ok_or_else(|| {
        PipelineError::configuration(format!(
            "rule {:?} defines no backend to forward to",
            allowed.rule_id
        ))
    })?;

    let url = backend.upstream_url(original);
    debug!(rule = %allowed.rule_id, %url, "forwarding request");

    let method = reqwest::Method::from_bytes(original.method.as_bytes())
        .map_err(|e| PipelineError::internal("invalid request method").with_source(e))?;

    let mut builder = state.client.inner().request(method, &url);

    for (name, value) in &original.headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        // finalized headers take precedence over the caller's
        if allowed.upstream_headers.contains_key(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
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

    if !original.body.is_empty() {
        builder = builder.body(original.body.clone());
    }

    let backend_response = tokio::select! {
        biased;
        _ = cancellation.cancelled() => {
            return Err(PipelineError::communication("request cancelled"));
        }
        result = builder.send() => result.map_err(|e| {
            PipelineError::communication(format!("request to {url:?} failed")).with_source(e)
        })?,
    };

    let status = backend_response.status();
    let headers = backend_response.headers().clone();
    let body = backend_response.bytes().await.map_err(|e| {
        PipelineError::communication("failed to read the backend response").with_source(e)
    })?;

    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in &headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(body))
        .map_err(|e| PipelineError::internal("failed to build the response").with_source(e))
}
