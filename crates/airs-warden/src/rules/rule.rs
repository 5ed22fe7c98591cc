//! Compiled Rules

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 3: Internal module imports
use crate::expression::Expression;
use crate::mechanisms::authenticators::Authenticator;
use crate::mechanisms::authorizers::Authorizer;
use crate::mechanisms::contextualizers::Contextualizer;
use crate::mechanisms::error_handlers::ErrorHandler;
use crate::mechanisms::finalizers::Finalizer;
use crate::pipeline::RequestInfo;
use crate::rules::config::{BackendConfig, RewriteConfig};
use crate::rules::matcher::RuleMatcher;

/// Upstream backend with optional URL rewriting
#[derive(Debug, Clone)]
pub struct Backend {
    pub host: String,
    pub rewrite: Option<RewriteConfig>,
}

impl From<&BackendConfig> for Backend {
    fn from(config: &BackendConfig) -> Self {
        Self {
            host: config.host.clone(),
            rewrite: config.rewrite.clone(),
        }
    }
}

impl Backend {
    /// URL the request is forwarded to in proxy mode
    pub fn upstream_url(&self, request: &RequestInfo) -> String {
        let rewrite = self.rewrite.as_ref();

        let scheme = rewrite
            .and_then(|r| r.scheme.as_deref())
            .unwrap_or(&request.scheme);

        let mut path = request.path.clone();
        if let Some(prefix) = rewrite.and_then(|r| r.strip_path_prefix.as_deref()) {
            if let Some(stripped) = path.strip_prefix(prefix) {
                path = if stripped.starts_with('/') {
                    stripped.to_string()
                } else {
                    format!("/{stripped}")
                };
            }
        }
        if let Some(prefix) = rewrite.and_then(|r| r.add_path_prefix.as_deref()) {
            path = format!("{}{path}", prefix.trim_end_matches('/'));
        }

        let stripped_params = rewrite.map(|r| r.strip_query_parameters.as_slice());
        let query: Vec<String> = request
            .query
            .iter()
            .filter(|(name, _)| {
                !stripped_params
                    .map(|params| params.iter().any(|param| param == *name))
                    .unwrap_or(false)
            })
            .map(|(name, value)| {
                format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
            })
            .collect();

        let mut url = format!("{scheme}://{}{path}", self.host);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

/// An error handler guarded by its rule's condition expression
#[derive(Debug)]
pub struct ConditionalErrorHandler {
    /// An absent condition always matches
    pub condition: Option<Expression>,
    pub handler: Arc<dyn ErrorHandler>,
}

/// A rule with its compiled matcher and mechanism instances
#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub src_file: Option<String>,
    pub matcher: RuleMatcher,
    pub backend: Option<Backend>,
    pub authenticators: Vec<Arc<dyn Authenticator>>,
    pub contextualizers: Vec<Arc<dyn Contextualizer>>,
    pub authorizers: Vec<Arc<dyn Authorizer>>,
    pub finalizers: Vec<Arc<dyn Finalizer>>,
    pub error_handlers: Vec<ConditionalErrorHandler>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestInfo {
        RequestInfo::new("GET", "https", "example.com", "/api/books")
            .with_query("page", "2")
            .with_query("trace", "on")
    }

    #[test]
    fn test_upstream_url_without_rewrite() {
        let backend = Backend {
            host: "books.svc.local:8080".to_string(),
            rewrite: None,
        };
        assert_eq!(
            backend.upstream_url(&request()),
            "https://books.svc.local:8080/api/books?page=2&trace=on"
        );
    }

    #[test]
    fn test_upstream_url_with_rewrite() {
        let backend = Backend {
            host: "books.svc.local:8080".to_string(),
            rewrite: Some(RewriteConfig {
                scheme: Some("http".to_string()),
                strip_path_prefix: Some("/api".to_string()),
                add_path_prefix: Some("/internal".to_string()),
                strip_query_parameters: vec!["trace".to_string()],
            }),
        };
        assert_eq!(
            backend.upstream_url(&request()),
            "http://books.svc.local:8080/internal/books?page=2"
        );
    }
}
