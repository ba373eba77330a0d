//! Issues, validates, rotates and revokes access/refresh credential pairs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::jwt::{AccessTokenClaims, JwtService, TokenError};
use crate::config::JwtConfig;
use crate::models::{RefreshTokenRecord, SuccessorToken};
use crate::store::{ClaimOutcome, RefreshTokenStore, StoreError};

const REFRESH_TOKEN_BYTES: usize = 32;
// Base64 of 32 bytes is 43 chars; anything far longer is not ours.
const MAX_REFRESH_TOKEN_LEN: usize = 128;

/// A freshly minted credential pair.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub claims: AccessTokenClaims,
    pub refresh_record: RefreshTokenRecord,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Failed to persist refresh token: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to sign access token: {0}")]
    Signing(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RotateError {
    #[error("Refresh token expired")]
    Expired,

    #[error("Refresh token revoked")]
    Revoked,

    #[error("Refresh token reused")]
    Reused,

    #[error("Unknown refresh token")]
    Unknown,

    #[error("Token store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Issue(#[from] IssueError),
}

impl RotateError {
    /// Credentials presented with this error can never become valid again.
    pub fn is_terminal_for_session(&self) -> bool {
        matches!(self, RotateError::Reused | RotateError::Revoked)
    }
}

pub struct TokenAuthority {
    jwt: JwtService,
    store: Arc<dyn RefreshTokenStore>,
    refresh_token_ttl_seconds: i64,
    reuse_revokes_family: bool,
}

impl TokenAuthority {
    pub fn new(jwt: JwtService, store: Arc<dyn RefreshTokenStore>, config: &JwtConfig) -> Self {
        Self {
            jwt,
            store,
            refresh_token_ttl_seconds: config.refresh_token_ttl_seconds,
            reuse_revokes_family: config.reuse_revokes_family,
        }
    }

    /// Start a new session family for an authenticated subject.
    pub async fn issue(
        &self,
        subject_id: &str,
        roles: &[String],
    ) -> Result<IssuedCredentials, IssueError> {
        let (access_token, claims) = self
            .jwt
            .generate_access_token(subject_id, roles)
            .map_err(IssueError::Signing)?;

        let refresh_token = generate_refresh_token();
        let refresh_record = RefreshTokenRecord::new(
            subject_id.to_string(),
            roles.to_vec(),
            Uuid::new_v4(),
            &refresh_token,
            self.refresh_token_ttl_seconds,
        );
        self.store.insert_refresh_token(&refresh_record).await?;

        info!(
            subject_id = %subject_id,
            family_id = %refresh_record.family_id,
            "Issued new session"
        );
        Ok(IssuedCredentials {
            access_token,
            refresh_token,
            claims,
            refresh_record,
        })
    }

    pub fn validate(&self, access_token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.jwt.validate_access_token(access_token)
    }

    /// Exchange a refresh token for a new pair in the same family.
    ///
    /// The presented token is consumed and its successor stored in one
    /// atomic store operation; a second presentation yields `Reused`.
    pub async fn rotate(&self, refresh_token: &str) -> Result<IssuedCredentials, RotateError> {
        if refresh_token.is_empty() || refresh_token.len() > MAX_REFRESH_TOKEN_LEN {
            return Err(RotateError::Unknown);
        }

        let token_hash = RefreshTokenRecord::hash_token(refresh_token);
        let next_token = generate_refresh_token();
        let successor = SuccessorToken::new(&next_token, self.refresh_token_ttl_seconds);

        match self
            .store
            .rotate_refresh_token(&token_hash, successor, Utc::now())
            .await?
        {
            ClaimOutcome::Rotated { claimed, successor } => {
                let (access_token, claims) = self
                    .jwt
                    .generate_access_token(&claimed.subject_id, &claimed.roles)
                    .map_err(IssueError::Signing)?;
                info!(
                    subject_id = %claimed.subject_id,
                    family_id = %claimed.family_id,
                    "Rotated refresh token"
                );
                Ok(IssuedCredentials {
                    access_token,
                    refresh_token: next_token,
                    claims,
                    refresh_record: successor,
                })
            }
            ClaimOutcome::AlreadyConsumed(record) => {
                warn!(
                    subject_id = %record.subject_id,
                    family_id = %record.family_id,
                    token_id = %record.token_id,
                    "Refresh token reuse detected"
                );
                if self.reuse_revokes_family {
                    match self.store.revoke_family(record.family_id).await {
                        Ok(revoked) => warn!(
                            family_id = %record.family_id,
                            revoked,
                            "Revoked refresh token family after reuse"
                        ),
                        Err(e) => error!(
                            family_id = %record.family_id,
                            error = %e,
                            "Failed to revoke refresh token family after reuse"
                        ),
                    }
                }
                Err(RotateError::Reused)
            }
            ClaimOutcome::Revoked(_) => Err(RotateError::Revoked),
            ClaimOutcome::Expired(_) => Err(RotateError::Expired),
            ClaimOutcome::NotFound => Err(RotateError::Unknown),
        }
    }

    /// Revoke one refresh token. Returns whether a live record was revoked.
    pub async fn revoke_token(&self, refresh_token: &str) -> Result<bool, StoreError> {
        let token_hash = RefreshTokenRecord::hash_token(refresh_token);
        self.store.revoke_refresh_token(&token_hash).await
    }

    /// Revoke every refresh token of a subject.
    pub async fn revoke_subject(&self, subject_id: &str) -> Result<u64, StoreError> {
        let revoked = self.store.revoke_subject(subject_id).await?;
        info!(subject_id = %subject_id, revoked, "Revoked all sessions of subject");
        Ok(revoked)
    }
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
