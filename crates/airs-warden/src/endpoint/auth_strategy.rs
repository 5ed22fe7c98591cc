//! Endpoint Authentication Strategies
//!
//! Pluggable authentication applied to outgoing endpoint calls: HTTP basic
//! auth, API keys in header, cookie or query, and OAuth2 client credentials
//! with process-wide token caching.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

// Layer 3: Internal module imports
use crate::endpoint::client::HttpClient;
use crate::error::{PipelineError, PipelineResult};

/// Safety margin subtracted from a token's lifetime before it is reused
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(5);

/// Where an API key is placed on the outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyPlacement {
    Header,
    Cookie,
    Query,
}

/// Authentication strategy for an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    Basic {
        user: String,
        password: String,
    },
    ApiKey {
        #[serde(rename = "in")]
        placement: ApiKeyPlacement,
        name: String,
        value: String,
    },
    Oauth2ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scopes: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl AuthStrategy {
    /// Apply the strategy to an outgoing request
    pub async fn apply(
        &self,
        client: &HttpClient,
        cancel: &CancellationToken,
        request: RequestBuilder,
    ) -> PipelineResult<RequestBuilder> {
        match self {
            AuthStrategy::Basic { user, password } => {
                let credentials = STANDARD.encode(format!("{user}:{password}"));
                Ok(request.header(http::header::AUTHORIZATION, format!("Basic {credentials}")))
            }
            AuthStrategy::ApiKey {
                placement,
                name,
                value,
            } => Ok(match placement {
                ApiKeyPlacement::Header => request.header(name, value),
                ApiKeyPlacement::Cookie => {
                    request.header(http::header::COOKIE, format!("{name}={value}"))
                }
                ApiKeyPlacement::Query => request.query(&[(name, value)]),
            }),
            AuthStrategy::Oauth2ClientCredentials { .. } => {
                let token = self.client_credentials_token(client, cancel).await?;
                Ok(request.bearer_auth(token))
            }
        }
    }

    async fn client_credentials_token(
        &self,
        client: &HttpClient,
        cancel: &CancellationToken,
    ) -> PipelineResult<String> {
        let AuthStrategy::Oauth2ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scopes,
        } = self
        else {
            return Err(PipelineError::internal(
                "client credentials requested for a different strategy",
            ));
        };

        let key = format!("cc:{token_url}:{client_id}:{}", scopes.join(" "));

        client
            .token_cache()
            .get_or_compute(&key, || async {
                debug!(%token_url, %client_id, "requesting client credentials token");

                let mut form = vec![("grant_type", "client_credentials".to_string())];
                if !scopes.is_empty() {
                    form.push(("scope", scopes.join(" ")));
                }

                let request = client
                    .inner()
                    .post(token_url)
                    .basic_auth(client_id, Some(client_secret))
                    .header(http::header::ACCEPT, "application/json")
                    .form(&form);

                let response = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(PipelineError::communication("token request cancelled"));
                    }
                    result = request.send() => result.map_err(|e| {
                        PipelineError::communication("failed to request access token")
                            .with_source(e)
                    })?,
                };

                if !response.status().is_success() {
                    return Err(PipelineError::communication(format!(
                        "unexpected response code: {}",
                        response.status().as_u16()
                    )));
                }

                let token: TokenResponse = response.json().await.map_err(|e| {
                    PipelineError::internal("failed to unmarshal token response").with_source(e)
                })?;

                let ttl = token
                    .expires_in
                    .map(Duration::from_secs)
                    .map(|lifetime| lifetime.saturating_sub(TOKEN_EXPIRY_SKEW))
                    .filter(|ttl| !ttl.is_zero());

                Ok((token.access_token, ttl))
            })
            .await
    }

}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_api_key_deserialization_uses_the_in_field() {
        let strategy: AuthStrategy = serde_json::from_value(json!({
            "api_key": {"in": "header", "name": "X-API-Key", "value": "foo"}
        }))
        .unwrap();

        assert_eq!(
            strategy,
            AuthStrategy::ApiKey {
                placement: ApiKeyPlacement::Header,
                name: "X-API-Key".to_string(),
                value: "foo".to_string(),
            }
        );
    }

    #[test]
    fn test_client_credentials_deserialization() {
        let strategy: AuthStrategy = serde_json::from_value(json!({
            "oauth2_client_credentials": {
                "token_url": "https://foo.bar/token",
                "client_id": "foo",
                "client_secret": "bar",
            }
        }))
        .unwrap();

        assert_eq!(
            strategy,
            AuthStrategy::Oauth2ClientCredentials {
                token_url: "https://foo.bar/token".to_string(),
                client_id: "foo".to_string(),
                client_secret: "bar".to_string(),
                scopes: Vec::new(),
            }
        );
    }
}
