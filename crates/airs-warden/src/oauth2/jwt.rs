//! JWT Claim and Signature Verification

// Layer 1: Standard library imports
use std::collections::HashSet;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use jsonwebtoken::{decode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

/// Signature algorithms accepted when no explicit allowlist is configured
const DEFAULT_ALLOWED_ALGORITHMS: [&str; 8] = [
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384",
];

fn default_leeway() -> Duration {
    Duration::from_secs(10)
}

/// Assertions applied to verified tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertions {
    /// At least one of these audiences must be present in the token
    #[serde(default)]
    pub audience: Vec<String>,

    /// Scopes the token must carry
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Clock skew tolerance for time based claims
    #[serde(default = "default_leeway")]
    pub validity_leeway: Duration,

    /// Policy allowlist of signature algorithms; empty means the default set
    #[serde(default)]
    pub allowed_algorithms: Vec<String>,
}

impl Default for Assertions {
    fn default() -> Self {
        Self {
            audience: Vec::new(),
            scopes: Vec::new(),
            validity_leeway: default_leeway(),
            allowed_algorithms: Vec::new(),
        }
    }
}

impl Assertions {
    fn allowlist(&self) -> Vec<String> {
        if self.allowed_algorithms.is_empty() {
            DEFAULT_ALLOWED_ALGORITHMS
                .iter()
                .map(|alg| (*alg).to_string())
                .collect()
        } else {
            self.allowed_algorithms.clone()
        }
    }
}

/// Intersect the algorithms advertised by the server metadata with the
/// configured policy allowlist
///
/// An empty advertisement leaves the allowlist as is; an empty intersection
/// is a policy misconfiguration.
pub fn permitted_algorithms(
    advertised: &[String],
    assertions: &Assertions,
) -> PipelineResult<Vec<String>> {
    let allowlist = assertions.allowlist();

    let permitted: Vec<String> = if advertised.is_empty() {
        allowlist
    } else {
        let advertised: HashSet<&str> = advertised.iter().map(String::as_str).collect();
        allowlist
            .into_iter()
            .filter(|alg| advertised.contains(alg.as_str()))
            .collect()
    };

    if permitted.is_empty() {
        return Err(PipelineError::configuration(
            "no usable signature algorithms remain after applying the configured allowlist",
        ));
    }

    Ok(permitted)
}

/// Verify a token's signature and claims and return the claim set
pub fn verify_claims(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
    issuer: &str,
    assertions: &Assertions,
) -> PipelineResult<Value> {
    let mut validation = Validation::new(algorithm);
    validation.leeway = assertions.validity_leeway.as_secs();
    validation.validate_nbf = true;
    validation.set_issuer(&[issuer]);

    if assertions.audience.is_empty() {
        validation.validate_aud = false;
    } else {
        validation.set_audience(&assertions.audience);
    }

    let data = decode::<Value>(token, key, &validation).map_err(|e| match e.kind() {
        JwtErrorKind::ExpiredSignature => PipelineError::authentication("token has expired"),
        JwtErrorKind::ImmatureSignature => PipelineError::authentication("token is not yet valid"),
        JwtErrorKind::InvalidIssuer => {
            PipelineError::authentication("token issuer is not trusted")
        }
        JwtErrorKind::InvalidAudience => PipelineError::authentication(
            "token audience does not include the expected audience",
        ),
        JwtErrorKind::InvalidSignature => {
            PipelineError::authentication("token signature is invalid")
        }
        _ => PipelineError::authentication("token verification failed").with_source(e),
    })?;

    assert_issued_at(&data.claims, assertions.validity_leeway)?;
    assert_scopes(&assertions.scopes, &extract_scopes(&data.claims))?;

    Ok(data.claims)
}

/// Reject tokens issued in the future beyond the leeway
///
/// `exp` and `nbf` are validated by the decoder; `iat` is not.
fn assert_issued_at(claims: &Value, leeway: Duration) -> PipelineResult<()> {
    let Some(iat) = claims.get("iat").and_then(Value::as_i64) else {
        return Ok(());
    };

    let now = Utc::now().timestamp();
    if iat > now + leeway.as_secs() as i64 {
        return Err(PipelineError::authentication("token was issued in the future"));
    }

    Ok(())
}

/// Scopes of a claim set, from the `scope`/`scp` claim as a space separated
/// string or an array
pub fn extract_scopes(claims: &Value) -> Vec<String> {
    let claim = claims.get("scope").or_else(|| claims.get("scp"));
    match claim {
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Assert that all required scopes are granted
pub fn assert_scopes(required: &[String], actual: &[String]) -> PipelineResult<()> {
    let actual: HashSet<&str> = actual.iter().map(String::as_str).collect();
    for scope in required {
        if !actual.contains(scope.as_str()) {
            return Err(PipelineError::authentication(format!(
                "required scope {scope:?} is not granted"
            )));
        }
    }
    Ok(())
}
