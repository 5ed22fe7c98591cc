//! JWKS Resolution and Caching

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// Layer 3: Internal module imports
use crate::cache::TtlCache;
use crate::endpoint::{Endpoint, HttpClient};
use crate::error::{PipelineError, PipelineResult};

/// Default time to live for a cached JWKS
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);

/// JSON Web Key as served by a JWKS endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,

    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    // RSA components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // EC components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl JsonWebKey {
    /// Convert to a key usable for signature verification
    pub fn to_decoding_key(&self) -> PipelineResult<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| {
                    PipelineError::configuration("RSA key is missing the modulus (n)")
                })?;
                let e = self.e.as_deref().ok_or_else(|| {
                    PipelineError::configuration("RSA key is missing the exponent (e)")
                })?;
                DecodingKey::from_rsa_components(n, e).map_err(|err| {
                    PipelineError::configuration("failed to build an RSA verification key")
                        .with_source(err)
                })
            }
            "EC" => {
                let x = self.x.as_deref().ok_or_else(|| {
                    PipelineError::configuration("EC key is missing the x coordinate")
                })?;
                let y = self.y.as_deref().ok_or_else(|| {
                    PipelineError::configuration("EC key is missing the y coordinate")
                })?;
                DecodingKey::from_ec_components(x, y).map_err(|err| {
                    PipelineError::configuration("failed to build an EC verification key")
                        .with_source(err)
                })
            }
            other => Err(PipelineError::configuration(format!(
                "unsupported key type {other:?}"
            ))),
        }
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    pub fn key(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|key| key.kid.as_deref() == Some(kid))
    }
}

/// TTL cache over JWKS endpoints with key-rotation handling
///
/// A lookup for an unknown kid triggers at most one refetch per
/// verification, so freshly rotated keys are picked up without hammering
/// the JWKS endpoint.
pub struct JwksCache {
    cache: TtlCache<JsonWebKeySet>,
    ttl: Duration,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new(DEFAULT_JWKS_TTL)
    }
}

impl JwksCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::default(),
            ttl,
        }
    }

    /// Resolve the key with the given kid via the JWKS endpoint
    pub async fn key(
        &self,
        client: &HttpClient,
        cancel: &CancellationToken,
        endpoint: &Endpoint,
        values: &Value,
        kid: &str,
    ) -> PipelineResult<JsonWebKey> {
        let cache_key = format!("jwks:{}", endpoint.url);

        let key_set = self
            .cache
            .get_or_compute(&cache_key, || Self::fetch(client, cancel, endpoint, values, self.ttl))
            .await?;

        if let Some(key) = key_set.key(kid) {
            return Ok(key.clone());
        }

        // unknown kid; the key may have been rotated since the last fetch
        debug!(kid, "kid not found in cached JWKS, refetching");
        self.cache.invalidate(&cache_key);

        let key_set = self
            .cache
            .get_or_compute(&cache_key, || Self::fetch(client, cancel, endpoint, values, self.ttl))
            .await?;

        key_set.key(kid).cloned().ok_or_else(|| {
            PipelineError::authentication(format!("no key with kid {kid:?} present in the JWKS"))
        })
    }

    async fn fetch(
        client: &HttpClient,
        cancel: &CancellationToken,
        endpoint: &Endpoint,
        values: &Value,
        ttl: Duration,
    ) -> PipelineResult<(JsonWebKeySet, Option<Duration>)> {
        let response = endpoint
            .call(client, cancel, values, None)
            .await?
            .ensure_success()?;

        let key_set: JsonWebKeySet = serde_json::from_slice(&response.body)
            .map_err(|e| PipelineError::internal("failed to unmarshal JWKS").with_source(e))?;

        debug!(url = %endpoint.url, keys = key_set.keys.len(), "fetched JWKS");

        Ok((key_set, Some(ttl)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_set_lookup_by_kid() {
        let key_set: JsonWebKeySet = serde_json::from_value(json!({
            "keys": [
                {"kty": "RSA", "kid": "key1", "n": "AQAB", "e": "AQAB"},
                {"kty": "RSA", "kid": "key2", "n": "AQAB", "e": "AQAB"},
            ]
        }))
        .unwrap();

        assert_eq!(key_set.key("key2").and_then(|k| k.kid.as_deref()), Some("key2"));
        assert!(key_set.key("missing").is_none());
    }

    #[test]
    fn test_rsa_key_without_modulus_is_rejected() {
        let key = JsonWebKey {
            kty: "RSA".to_string(),
            usage: None,
            alg: None,
            kid: None,
            n: None,
            e: Some("AQAB".to_string()),
            crv: None,
            x: None,
            y: None,
        };
        let err = key.to_decoding_key().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_unsupported_key_type_is_rejected() {
        let key: JsonWebKey =
            serde_json::from_value(json!({"kty": "oct", "kid": "k"})).unwrap();
        let err = key.to_decoding_key().unwrap_err();
        assert!(err.message().contains("unsupported key type"));
    }
}
