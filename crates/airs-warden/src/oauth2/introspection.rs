//! Token Introspection Response Handling (RFC 7662)

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

/// Response of an introspection endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,

    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl IntrospectionResponse {
    /// Validate issuer, audience and time based claims of an active token
    pub fn assert(
        &self,
        expected_issuer: Option<&str>,
        expected_audience: &[String],
        leeway: Duration,
    ) -> PipelineResult<()> {
        if !self.active {
            return Err(PipelineError::authentication("token is not active"));
        }

        if let Some(expected) = expected_issuer {
            match self.claims.get("iss").and_then(Value::as_str) {
                Some(issuer) if issuer == expected => {}
                Some(issuer) => {
                    return Err(PipelineError::authentication(format!(
                        "token issuer {issuer:?} is not trusted"
                    )));
                }
                None => {
                    return Err(PipelineError::authentication(
                        "token introspection response contains no issuer",
                    ));
                }
            }
        }

        if !expected_audience.is_empty() && !self.has_any_audience(expected_audience) {
            return Err(PipelineError::authentication(
                "token audience does not include the expected audience",
            ));
        }

        let now = Utc::now().timestamp();
        let leeway = leeway.as_secs() as i64;

        if let Some(exp) = self.claims.get("exp").and_then(Value::as_i64) {
            if now - leeway >= exp {
                return Err(PipelineError::authentication("token has expired"));
            }
        }

        if let Some(nbf) = self.claims.get("nbf").and_then(Value::as_i64) {
            if now + leeway < nbf {
                return Err(PipelineError::authentication("token is not yet valid"));
            }
        }

        Ok(())
    }

    fn has_any_audience(&self, expected: &[String]) -> bool {
        match self.claims.get("aud") {
            Some(Value::String(aud)) => expected.iter().any(|e| e == aud),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .any(|aud| expected.iter().any(|e| e == aud)),
            _ => false,
        }
    }

    /// The claim set as a JSON value
    pub fn claims_value(&self) -> Value {
        Value::Object(self.claims.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    fn response(value: Value) -> IntrospectionResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_inactive_token_is_rejected() {
        let resp = response(json!({"active": false}));
        let err = resp.assert(None, &[], Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.message().contains("not active"));
    }

    #[test]
    fn test_issuer_mismatch_is_rejected() {
        let resp = response(json!({"active": true, "iss": "https://other.test"}));
        let err = resp
            .assert(Some("https://auth.test"), &[], Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_audience_match_accepts_string_and_array() {
        let audience = vec!["api".to_string()];

        let resp = response(json!({"active": true, "aud": "api"}));
        assert!(resp.assert(None, &audience, Duration::ZERO).is_ok());

        let resp = response(json!({"active": true, "aud": ["other", "api"]}));
        assert!(resp.assert(None, &audience, Duration::ZERO).is_ok());

        let resp = response(json!({"active": true, "aud": "other"}));
        assert!(resp.assert(None, &audience, Duration::ZERO).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected_with_leeway() {
        let past = Utc::now().timestamp() - 30;
        let resp = response(json!({"active": true, "exp": past}));

        assert!(resp.assert(None, &[], Duration::ZERO).is_err());
        assert!(resp.assert(None, &[], Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_valid_response_exposes_claims() {
        let resp = response(json!({"active": true, "sub": "alice", "scope": "read"}));
        assert!(resp.assert(None, &[], Duration::ZERO).is_ok());
        assert_eq!(resp.claims_value()["sub"], json!("alice"));
    }
}
