//! Shared Test Fixtures
//!
//! RSA key material for JWT tests: the fixture private key signs tokens,
//! and its public components are served as a JWKS by the mock servers.

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};

pub const TEST_KID: &str = "test-key-1";

const TEST_KEY_PEM: &str = include_str!("../fixtures/test_rsa_key.pem");

/// RSA keys for JWT tests with a matching JWKS document
pub struct TestKeys {
    pub encoding_key: EncodingKey,
    pub jwks_response: Value,
}

/// Load the fixture key and derive the JWKS served by mock servers
pub fn test_keys() -> TestKeys {
    let encoding_key =
        EncodingKey::from_rsa_pem(TEST_KEY_PEM.as_bytes()).expect("fixture key is valid");

    let private_key =
        RsaPrivateKey::from_pkcs1_pem(TEST_KEY_PEM).expect("fixture key is valid PKCS#1");
    let public_key = private_key.to_public_key();

    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_be_bytes());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_be_bytes());

    let jwks_response = json!({
        "keys": [
            {
                "kty": "RSA",
                "use": "sig",
                "kid": TEST_KID,
                "alg": "RS256",
                "n": n,
                "e": e,
            }
        ]
    });

    TestKeys {
        encoding_key,
        jwks_response,
    }
}

/// Sign a claim set with the fixture key
pub fn sign_token(keys: &TestKeys, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    jsonwebtoken::encode(&header, claims, &keys.encoding_key).expect("signing succeeds")
}

/// A standard claim set valid for five minutes
pub fn claims(issuer: &str, subject: &str) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "iss": issuer,
        "sub": subject,
        "aud": "my-api",
        "iat": now,
        "nbf": now,
        "exp": now + 300,
        "scope": "read write",
    })
}
