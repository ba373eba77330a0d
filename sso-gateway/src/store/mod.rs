//! Persistent store contracts used by the registry cache and the token
//! authority, with PostgreSQL and in-memory implementations.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{RefreshTokenRecord, RegistryData, SuccessorToken};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Refresh token already exists: {0}")]
    Conflict(String),
}

/// Result of an atomic claim-then-replace on a refresh token.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller consumed the token and its successor was stored in the
    /// same step.
    Rotated {
        claimed: RefreshTokenRecord,
        successor: RefreshTokenRecord,
    },
    /// The token was consumed before; replay.
    AlreadyConsumed(RefreshTokenRecord),
    Revoked(RefreshTokenRecord),
    Expired(RefreshTokenRecord),
    NotFound,
}

impl ClaimOutcome {
    /// Classify a record that the conditional update did not match.
    ///
    /// Consumption is checked first so a replayed token keeps reporting
    /// reuse even after its family has been revoked.
    pub fn classify_unclaimed(record: RefreshTokenRecord, now: DateTime<Utc>) -> Self {
        if record.is_consumed() {
            ClaimOutcome::AlreadyConsumed(record)
        } else if record.is_revoked() {
            ClaimOutcome::Revoked(record)
        } else if record.is_expired_at(now) {
            ClaimOutcome::Expired(record)
        } else {
            // Lost a race between the update and this read; the state only
            // moves forward, so the token is no longer claimable.
            ClaimOutcome::AlreadyConsumed(record)
        }
    }
}

/// Read side of the registry tables.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Full enumeration of services, resources and roles from one
    /// consistent read.
    async fn fetch_registry(&self) -> Result<RegistryData, StoreError>;
}

/// Refresh token persistence.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Mark the token consumed if it is unconsumed, unrevoked and unexpired,
    /// and store `successor` in its family, as one atomic step. Either both
    /// happen or neither does. Of concurrent callers on one hash at most one
    /// gets `Rotated`, and the others observe the token only after its
    /// successor exists.
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        successor: SuccessorToken,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Returns whether a live record was revoked.
    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError>;

    /// Returns the number of records revoked.
    async fn revoke_subject(&self, subject_id: &str) -> Result<u64, StoreError>;

    /// Returns the number of records revoked.
    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, StoreError>;
}
