//! In-memory store for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ClaimOutcome, RefreshTokenStore, RegistryStore, StoreError};
use crate::models::{RefreshTokenRecord, RegistryData, SuccessorToken};

#[derive(Default)]
pub struct InMemoryStore {
    registry: Mutex<RegistryData>,
    refresh_tokens: Mutex<HashMap<String, RefreshTokenRecord>>,
    fail_registry: AtomicBool,
    fail_refresh_writes: AtomicBool,
    registry_fetches: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(data: RegistryData) -> Self {
        let store = Self::default();
        store.set_registry(data);
        store
    }

    /// Replace the registry contents returned by the next fetch.
    pub fn set_registry(&self, data: RegistryData) {
        *lock(&self.registry) = data;
    }

    /// Make registry fetches fail, simulating an unreachable database.
    pub fn set_registry_unavailable(&self, unavailable: bool) {
        self.fail_registry.store(unavailable, Ordering::SeqCst);
    }

    /// Make refresh token writes fail before touching any record.
    pub fn set_refresh_writes_unavailable(&self, unavailable: bool) {
        self.fail_refresh_writes.store(unavailable, Ordering::SeqCst);
    }

    fn check_refresh_writes(&self) -> Result<(), StoreError> {
        if self.fail_refresh_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "refresh token store is unreachable".to_string(),
            ));
        }
        Ok(())
    }

    pub fn registry_fetch_count(&self) -> u64 {
        self.registry_fetches.load(Ordering::SeqCst)
    }

    pub fn refresh_token_by_hash(&self, token_hash: &str) -> Option<RefreshTokenRecord> {
        lock(&self.refresh_tokens).get(token_hash).cloned()
    }

    pub fn family_records(&self, family_id: Uuid) -> Vec<RefreshTokenRecord> {
        lock(&self.refresh_tokens)
            .values()
            .filter(|r| r.family_id == family_id)
            .cloned()
            .collect()
    }
}

// A poisoned lock only means another test thread panicked mid-update; the
// maps themselves are always left consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn fetch_registry(&self) -> Result<RegistryData, StoreError> {
        self.registry_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_registry.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "registry store is unreachable".to_string(),
            ));
        }
        Ok(lock(&self.registry).clone())
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.check_refresh_writes()?;
        let mut tokens = lock(&self.refresh_tokens);
        if tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict(record.token_id.to_string()));
        }
        tokens.insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        successor: SuccessorToken,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        self.check_refresh_writes()?;

        // Claim and replace under one guard; every check precedes the
        // first mutation.
        let mut tokens = lock(&self.refresh_tokens);
        let Some(record) = tokens.get(token_hash) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if !record.is_claimable_at(now) {
            return Ok(ClaimOutcome::classify_unclaimed(record.clone(), now));
        }
        if tokens.contains_key(&successor.token_hash) {
            return Err(StoreError::Conflict(successor.token_id.to_string()));
        }

        let mut claimed = record.clone();
        claimed.consumed_utc = Some(now);
        let successor = successor.replacing(&claimed, now);

        tokens.insert(claimed.token_hash.clone(), claimed.clone());
        tokens.insert(successor.token_hash.clone(), successor.clone());
        Ok(ClaimOutcome::Rotated { claimed, successor })
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut tokens = lock(&self.refresh_tokens);
        match tokens.get_mut(token_hash) {
            Some(record) if !record.is_revoked() => {
                record.revoked_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_subject(&self, subject_id: &str) -> Result<u64, StoreError> {
        Ok(revoke_where(&self.refresh_tokens, |r| r.subject_id == subject_id))
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, StoreError> {
        Ok(revoke_where(&self.refresh_tokens, |r| r.family_id == family_id))
    }
}

fn revoke_where<F>(tokens: &Mutex<HashMap<String, RefreshTokenRecord>>, predicate: F) -> u64
where
    F: Fn(&RefreshTokenRecord) -> bool,
{
    let now = Utc::now();
    let mut revoked = 0;
    for record in lock(tokens).values_mut() {
        if !record.is_revoked() && predicate(record) {
            record.revoked_utc = Some(now);
            revoked += 1;
        }
    }
    revoked
}
