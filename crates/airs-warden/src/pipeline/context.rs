//! Per-Request Pipeline Context

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use http::header::COOKIE;
use http::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Outputs, Subject};

/// Read-only view of the incoming request
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: IndexMap<String, String>,
    pub headers: HeaderMap,
    pub client_address: Option<String>,
    pub body: Bytes,

    /// Values captured by the matched rule's path template
    pub captures: IndexMap<String, String>,
}

impl RequestInfo {
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: scheme.into(),
            host: host.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of the given header
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Value of the given request cookie
    pub fn cookie(&self, name: &str) -> Option<String> {
        for value in self.headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                if parts.next() == Some(name) {
                    return parts.next().map(str::to_string);
                }
            }
        }
        None
    }

    /// Request URL without the scheme-relative parts that are absent
    pub fn uri(&self) -> String {
        let mut uri = format!("{}://{}{}", self.scheme, self.host, self.path);
        if !self.query.is_empty() {
            let encoded: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            uri.push('?');
            uri.push_str(&encoded.join("&"));
        }
        uri
    }

    /// Representation exposed to templates and condition expressions
    pub fn to_template_value(&self) -> Value {
        let mut headers = Map::new();
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), Value::String(value.to_string()));
            }
        }

        let query: Map<String, Value> = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let captures: Map<String, Value> = self
            .captures
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        json!({
            "Method": self.method,
            "Scheme": self.scheme,
            "Host": self.host,
            "Path": self.path,
            "URL": self.uri(),
            "Query": query,
            "Headers": headers,
            "Captures": captures,
            "ClientAddress": self.client_address,
            "Body": String::from_utf8_lossy(&self.body),
        })
    }
}

/// Mutable state carried through one rule evaluation
pub struct PipelineContext {
    request: RequestInfo,
    cancellation: CancellationToken,
    subject: Option<Subject>,
    outputs: Outputs,
    upstream_headers: HeaderMap,
    upstream_cookies: Vec<(String, String)>,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("request", &self.request)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    pub fn new(request: RequestInfo, cancellation: CancellationToken) -> Self {
        Self {
            request,
            cancellation,
            subject: None,
            outputs: Outputs::new(),
            upstream_headers: HeaderMap::new(),
            upstream_cookies: Vec::new(),
        }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    /// Record the authenticated subject
    ///
    /// The subject is created exactly once per request; a second call is an
    /// implementation error.
    pub fn set_subject(&mut self, subject: Subject) -> PipelineResult<()> {
        if self.subject.is_some() {
            return Err(PipelineError::internal("subject is already set"));
        }
        self.subject = Some(subject);
        Ok(())
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut Outputs {
        &mut self.outputs
    }

    /// Add a header to be sent to the upstream service
    pub fn add_header_for_upstream(&mut self, name: &str, value: &str) -> PipelineResult<()> {
        let name = name.parse::<HeaderName>().map_err(|e| {
            PipelineError::internal(format!("invalid upstream header name {name:?}")).with_source(e)
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            PipelineError::internal(format!("invalid upstream header value for {name:?}"))
                .with_source(e)
        })?;
        self.upstream_headers.append(name, value);
        Ok(())
    }

    /// Add a cookie to be sent to the upstream service
    pub fn add_cookie_for_upstream(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.upstream_cookies.push((name.into(), value.into()));
    }

    pub fn upstream_headers(&self) -> &HeaderMap {
        &self.upstream_headers
    }

    pub fn upstream_cookies(&self) -> &[(String, String)] {
        &self.upstream_cookies
    }

    pub fn into_upstream_parts(self) -> (HeaderMap, Vec<(String, String)>) {
        (self.upstream_headers, self.upstream_cookies)
    }

    /// Values exposed to templates: `{Subject, Request, Outputs}`
    pub fn template_values(&self) -> Value {
        let mut values = Map::new();
        values.insert("Request".to_string(), self.request.to_template_value());
        if let Some(subject) = &self.subject {
            if let Ok(subject) = serde_json::to_value(subject) {
                values.insert("Subject".to_string(), subject);
            }
        }
        if let Ok(outputs) = serde_json::to_value(&self.outputs) {
            values.insert("Outputs".to_string(), outputs);
        }
        Value::Object(values)
    }
}
