use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{JwtConfig, SigningAlgorithm};

/// Claims for access tokens (short-lived, never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub roles: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub jti: String,
    pub iss: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            // A token signed for another issuer or algorithm is not ours.
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::ImmatureSignature => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// JWT service for access token signing and validation
#[derive(Clone)]
pub struct JwtService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_ttl_seconds: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let (algorithm, encoding_key, decoding_key) = match config.algorithm {
            SigningAlgorithm::Hs256 => {
                let secret = config
                    .secret
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("JWT_SECRET is required for HS256"))?;
                let bytes = secret.expose_secret().as_bytes();
                (
                    Algorithm::HS256,
                    EncodingKey::from_secret(bytes),
                    DecodingKey::from_secret(bytes),
                )
            }
            SigningAlgorithm::Rs256 => {
                let private_path = config
                    .private_key_path
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("JWT_PRIVATE_KEY_PATH is required for RS256"))?;
                let public_path = config
                    .public_key_path
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("JWT_PUBLIC_KEY_PATH is required for RS256"))?;

                let private_key_pem = fs::read_to_string(private_path).map_err(|e| {
                    anyhow::anyhow!("Failed to read private key from {}: {}", private_path, e)
                })?;
                let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

                let public_key_pem = fs::read_to_string(public_path).map_err(|e| {
                    anyhow::anyhow!("Failed to read public key from {}: {}", public_path, e)
                })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

                (Algorithm::RS256, encoding_key, decoding_key)
            }
        };

        tracing::info!(algorithm = ?algorithm, issuer = %config.issuer, "JWT service initialized");

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            issuer: config.issuer.clone(),
            access_token_ttl_seconds: config.access_token_ttl_seconds,
        })
    }

    /// Sign a fresh access token for a subject
    pub fn generate_access_token(
        &self,
        subject_id: &str,
        roles: &[String],
    ) -> Result<(String, AccessTokenClaims), anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.access_token_ttl_seconds);

        let claims = AccessTokenClaims {
            sub: subject_id.to_string(),
            roles: roles.to_vec(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
        };

        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    pub(crate) fn sign(&self, claims: &AccessTokenClaims) -> Result<String, anyhow::Error> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    /// Validate and decode an access token. Zero leeway on expiry.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims)
    }
}
