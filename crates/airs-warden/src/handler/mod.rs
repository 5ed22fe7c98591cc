//! HTTP Service Surfaces
//!
//! The decision service signals allow/deny to an external reverse proxy,
//! the proxy service forwards allowed requests to the rule's backend
//! itself, and the management service publishes health and the process's
//! signing keys.

// Layer 1: Standard library imports

// Layer 2: Third-party crate imports
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use bytes::Bytes;
use indexmap::IndexMap;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};
use crate::mechanisms::error_handlers::ErrorResponse;
use crate::pipeline::RequestInfo;

pub mod decision;
pub mod management;
pub mod proxy;

/// Upper bound on buffered request bodies
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the pipeline's request view from an incoming HTTP request
///
/// In decision mode the external reverse proxy communicates the original
/// request via `X-Forwarded-*` headers, which take precedence when
/// `honor_forwarded` is set.
pub(crate) async fn request_info_from(
    request: Request<Body>,
    honor_forwarded: bool,
) -> PipelineResult<RequestInfo> {
    let (parts, body) = request.into_parts();

    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let forwarded = |name: &str| {
        if honor_forwarded {
            header(name)
        } else {
            None
        }
    };

    let method = forwarded("X-Forwarded-Method").unwrap_or_else(|| parts.method.to_string());

    let scheme = forwarded("X-Forwarded-Proto")
        .or_else(|| parts.uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());

    let host = forwarded("X-Forwarded-Host")
        .or_else(|| header("Host"))
        .or_else(|| parts.uri.host().map(str::to_string))
        .unwrap_or_default();

    let uri = forwarded("X-Forwarded-Uri").unwrap_or_else(|| {
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| "/".to_string())
    });
    let (path, raw_query) = match uri.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (uri, None),
    };

    let mut query = IndexMap::new();
    if let Some(raw_query) = raw_query {
        for (name, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            query.insert(name.into_owned(), value.into_owned());
        }
    }

    let client_address = forwarded("X-Forwarded-For")
        .map(|value| value.split(',').next().unwrap_or_default().trim().to_string());

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| PipelineError::internal("failed to buffer the request body").with_source(e))?;

    Ok(RequestInfo {
        method,
        scheme,
        host,
        path,
        query,
        headers: parts.headers,
        client_address,
        body,
        captures: IndexMap::new(),
    })
}

/// A response carrying only a status code
pub(crate) fn plain_status(status: axum::http::StatusCode) -> Response {
    let mut response = Response::new(Body::from(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Convert an error handler's response into an HTTP response
pub(crate) fn denied_response(denied: ErrorResponse) -> Response {
    let mut builder = Response::builder().status(denied.status);

    for (name, value) in &denied.headers {
        builder = builder.header(name, value);
    }

    let body = match denied.body {
        Some((content_type, bytes)) => {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
            Body::from(bytes)
        }
        None => Body::from(Bytes::new()),
    };

    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::from(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forwarded_headers_take_precedence_in_decision_mode() {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("Host", "gateway.local")
            .header("X-Forwarded-Method", "GET")
            .header("X-Forwarded-Proto", "https")
            .header("X-Forwarded-Host", "app.test")
            .header("X-Forwarded-Uri", "/api/books?page=2")
            .body(Body::empty())
            .unwrap();

        let info = request_info_from(request, true).await.unwrap();
        assert_eq!(info.method, "GET");
        assert_eq!(info.scheme, "https");
        assert_eq!(info.host, "app.test");
        assert_eq!(info.path, "/api/books");
        assert_eq!(info.query.get("page").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_forwarded_headers_are_ignored_in_proxy_mode() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/books")
            .header("Host", "app.test")
            .header("X-Forwarded-Method", "GET")
            .body(Body::empty())
            .unwrap();

        let info = request_info_from(request, false).await.unwrap();
        assert_eq!(info.method, "POST");
        assert_eq!(info.host, "app.test");
        assert_eq!(info.path, "/api/books");
    }
}
