//! Signing Key Registry
//!
//! Holds the signing keys available to the jwt finalizer and publishes their
//! public parts on the management service's JWKS endpoint.

// Layer 1: Standard library imports
use std::path::PathBuf;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

fn default_algorithm() -> String {
    "RS256".to_string()
}

/// Configuration of one signing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    pub id: String,

    /// kid written into minted token headers; defaults to the id
    #[serde(default)]
    pub key_id: Option<String>,

    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Shared secret for HS* algorithms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// PEM encoded private key for RS*/PS*/ES* algorithms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

/// A loaded signing key
pub struct Signer {
    pub id: String,
    pub key_id: String,
    pub algorithm: Algorithm,
    encoding_key: EncodingKey,
    public_jwk: Option<Value>,
}

impl Signer {
    /// Sign the given claim set
    pub fn sign(&self, claims: &Value) -> PipelineResult<String> {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.key_id.clone());

        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| PipelineError::internal("failed to sign token").with_source(e))
    }

    fn from_config(config: &SignerConfig) -> PipelineResult<Self> {
        let algorithm: Algorithm = config.algorithm.parse().map_err(|e| {
            PipelineError::configuration(format!(
                "signer {:?} uses an unsupported algorithm {:?}",
                config.id, config.algorithm
            ))
            .with_source(e)
        })?;

        let key_id = config.key_id.clone().unwrap_or_else(|| config.id.clone());

        let (encoding_key, public_jwk) = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config.secret.as_deref().ok_or_else(|| {
                    PipelineError::configuration(format!(
                        "signer {:?} requires a secret for {}",
                        config.id, config.algorithm
                    ))
                })?;
                // symmetric keys are never published on the JWKS endpoint
                (EncodingKey::from_secret(secret.as_bytes()), None)
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                let pem = Self::read_key_file(config)?;
                let key = EncodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| {
                    PipelineError::configuration(format!(
                        "signer {:?} key material is not a valid EC key",
                        config.id
                    ))
                    .with_source(e)
                })?;
                (key, None)
            }
            _ => {
                let pem = Self::read_key_file(config)?;
                let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                    PipelineError::configuration(format!(
                        "signer {:?} key material is not a valid RSA key",
                        config.id
                    ))
                    .with_source(e)
                })?;
                let jwk = rsa_public_jwk(&config.id, &key_id, &config.algorithm, &pem)?;
                (key, Some(jwk))
            }
        };

        Ok(Self {
            id: config.id.clone(),
            key_id,
            algorithm,
            encoding_key,
            public_jwk,
        })
    }

    fn read_key_file(config: &SignerConfig) -> PipelineResult<String> {
        let path = config.key_file.as_ref().ok_or_else(|| {
            PipelineError::configuration(format!(
                "signer {:?} requires a key_file for {}",
                config.id, config.algorithm
            ))
        })?;

        std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!(
                "signer {:?}: failed to read key file {}",
                config.id,
                path.display()
            ))
            .with_source(e)
        })
    }
}

/// Extract the public components of an RSA private key as a JWK
fn rsa_public_jwk(id: &str, key_id: &str, algorithm: &str, pem: &str) -> PipelineResult<Value> {
    let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| {
            PipelineError::configuration(format!("signer {id:?}: failed to parse RSA key"))
                .with_source(e)
        })?;

    let public_key = private_key.to_public_key();
    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_be_bytes());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_be_bytes());

    Ok(json!({
        "kty": "RSA",
        "use": "sig",
        "kid": key_id,
        "alg": algorithm,
        "n": n,
        "e": e,
    }))
}

/// Registry of the process's signing keys
///
/// The first configured signer is the default.
#[derive(Default)]
pub struct KeyRegistry {
    signers: Vec<Arc<Signer>>,
}

impl KeyRegistry {
    pub fn from_config(configs: &[SignerConfig]) -> PipelineResult<Self> {
        let mut signers = Vec::with_capacity(configs.len());
        for config in configs {
            if signers
                .iter()
                .any(|signer: &Arc<Signer>| signer.id == config.id)
            {
                return Err(PipelineError::configuration(format!(
                    "duplicate signer id {:?}",
                    config.id
                )));
            }
            signers.push(Arc::new(Signer::from_config(config)?));
        }
        Ok(Self { signers })
    }

    /// Look up a signer; `None` selects the default
    pub fn signer(&self, id: Option<&str>) -> PipelineResult<Arc<Signer>> {
        match id {
            Some(id) => self
                .signers
                .iter()
                .find(|signer| signer.id == id)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::configuration(format!("no signer with id {id:?} configured"))
                }),
            None => self.signers.first().cloned().ok_or_else(|| {
                PipelineError::configuration("no signers configured")
            }),
        }
    }

    /// Public keys as a JWK set for the management service
    pub fn jwks(&self) -> Value {
        let keys: Vec<Value> = self
            .signers
            .iter()
            .filter_map(|signer| signer.public_jwk.clone())
            .collect();
        json!({ "keys": keys })
    }
}
