//! Authentication Data Extraction
//!
//! Strategies to pull a token or credential from the request: a header with
//! an optional scheme prefix, a cookie, or a query parameter. The default
//! chain mirrors common bearer token usage.

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::RequestInfo;

/// Where to look for the authentication data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenSource {
    Header {
        header: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheme: Option<String>,
    },
    Cookie {
        cookie: String,
    },
    QueryParameter {
        query_parameter: String,
    },
}

impl TokenSource {
    fn extract(&self, request: &RequestInfo) -> Option<String> {
        match self {
            TokenSource::Header { header, scheme } => {
                let value = request.header(header)?;
                match scheme {
                    Some(scheme) => {
                        let rest = value.strip_prefix(scheme.as_str())?;
                        Some(rest.strip_prefix(' ')?.trim().to_string())
                    }
                    None => Some(value),
                }
            }
            TokenSource::Cookie { cookie } => request.cookie(cookie),
            TokenSource::QueryParameter { query_parameter } => {
                request.query.get(query_parameter).cloned()
            }
        }
    }
}

fn default_sources() -> Vec<TokenSource> {
    vec![
        TokenSource::Header {
            header: "Authorization".to_string(),
            scheme: Some("Bearer".to_string()),
        },
        TokenSource::QueryParameter {
            query_parameter: "access_token".to_string(),
        },
        TokenSource::Cookie {
            cookie: "access_token".to_string(),
        },
    ]
}

/// Extract the authentication data using the configured sources, or the
/// default bearer token chain
pub fn extract_token(
    sources: Option<&[TokenSource]>,
    request: &RequestInfo,
) -> PipelineResult<String> {
    let default;
    let sources = match sources {
        Some(sources) => sources,
        None => {
            default = default_sources();
            &default
        }
    };

    sources
        .iter()
        .find_map(|source| source.extract(request))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| PipelineError::authentication("no authentication data present"))
}
