//! Registry cache: lock-free lookups against the current snapshot, refreshed
//! from the store by a single background writer.

mod pattern;
mod refresher;
mod snapshot;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use http::Method;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{RegistryStore, StoreError};

pub use pattern::{is_unsafe_segment, split_path, MethodPattern, PathPattern, PatternError};
pub use refresher::spawn_refresher;
pub use snapshot::{RegistrySnapshot, ResolvedResource};

#[derive(Debug, Error)]
pub enum LookupError {
    /// No snapshot has been installed yet.
    #[error("Registry not yet loaded")]
    Unavailable,

    #[error("Unknown service '{0}'")]
    ServiceNotFound(String),

    #[error("No resource of service '{service}' matches '{path}'")]
    ResourceNotFound { service: String, path: String },
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Registry fetch failed: {0}")]
    Store(#[from] StoreError),

    #[error("Registry data is inconsistent: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Default)]
struct RefreshState {
    last_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: u32,
}

/// Point-in-time view of the cache for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub warm: bool,
    pub version: Option<u64>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub age_seconds: Option<i64>,
    pub stale: bool,
    pub services: usize,
    pub resources: usize,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

pub struct RegistryCache {
    store: Arc<dyn RegistryStore>,
    current: ArcSwapOption<RegistrySnapshot>,
    ttl: Duration,
    state: Mutex<RefreshState>,
    // Serialises refreshes so versions are handed out in install order.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl RegistryCache {
    pub fn new(store: Arc<dyn RegistryStore>, ttl: Duration) -> Self {
        Self {
            store,
            current: ArcSwapOption::empty(),
            ttl,
            state: Mutex::new(RefreshState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current snapshot, if any. Holders keep their generation alive after a
    /// newer one is installed.
    pub fn snapshot(&self) -> Option<Arc<RegistrySnapshot>> {
        self.current.load_full()
    }

    pub fn is_warm(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn lookup(
        &self,
        service_name: &str,
        resource_path: &str,
        method: &Method,
    ) -> Result<ResolvedResource, LookupError> {
        let guard = self.current.load();
        match guard.as_ref() {
            Some(snapshot) => snapshot.lookup(service_name, resource_path, method),
            None => Err(LookupError::Unavailable),
        }
    }

    /// Fetch and install a new snapshot. The current snapshot is replaced
    /// only when both fetch and build succeed.
    pub async fn refresh(&self) -> Result<u64, RefreshError> {
        let _guard = self.refresh_lock.lock().await;
        let started = Instant::now();
        let attempted_at = Utc::now();

        let next_version = self.current.load().as_ref().map_or(1, |s| s.version() + 1);

        let result = match self.store.fetch_registry().await {
            Ok(data) => RegistrySnapshot::build(data, next_version, Utc::now()),
            Err(e) => Err(RefreshError::from(e)),
        };

        let elapsed = started.elapsed();
        metrics::histogram!("registry_refresh_duration_seconds").record(elapsed.as_secs_f64());

        match result {
            Ok(snapshot) => {
                let version = snapshot.version();
                info!(
                    version,
                    services = snapshot.service_count(),
                    resources = snapshot.resource_count(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Registry snapshot installed"
                );
                self.current.store(Some(Arc::new(snapshot)));

                let mut state = self.lock_state();
                state.last_attempt_at = Some(attempted_at);
                state.last_error = None;
                state.consecutive_failures = 0;
                drop(state);

                metrics::counter!("registry_refresh_total", "outcome" => "success").increment(1);
                metrics::gauge!("registry_snapshot_version").set(version as f64);
                Ok(version)
            }
            Err(e) => {
                let mut state = self.lock_state();
                state.last_attempt_at = Some(attempted_at);
                state.last_error = Some(e.to_string());
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let failures = state.consecutive_failures;
                drop(state);

                warn!(
                    error = %e,
                    consecutive_failures = failures,
                    warm = self.is_warm(),
                    "Registry refresh failed, keeping previous snapshot"
                );
                metrics::counter!("registry_refresh_total", "outcome" => "failure").increment(1);
                Err(e)
            }
        }
    }

    pub fn status(&self) -> RegistryStatus {
        let snapshot = self.snapshot();
        let state = self.lock_state().clone();
        let now = Utc::now();

        let age_seconds = snapshot
            .as_ref()
            .map(|s| (now - s.fetched_at()).num_seconds().max(0));
        let stale = age_seconds.map_or(true, |age| age as u64 > self.ttl.as_secs());

        RegistryStatus {
            warm: snapshot.is_some(),
            version: snapshot.as_ref().map(|s| s.version()),
            fetched_at: snapshot.as_ref().map(|s| s.fetched_at()),
            age_seconds,
            stale,
            services: snapshot.as_ref().map_or(0, |s| s.service_count()),
            resources: snapshot.as_ref().map_or(0, |s| s.resource_count()),
            last_attempt_at: state.last_attempt_at,
            last_error: state.last_error,
            consecutive_failures: state.consecutive_failures,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RegistryData, Resource, Role, Service};
    use crate::store::InMemoryStore;

    fn bank_registry() -> RegistryData {
        let bank = Service::new("bank", "http://bank:8080");
        RegistryData {
            resources: vec![Resource::new(
                bank.service_id,
                "getAccounts",
                "GET",
                &["bank_read"],
            )],
            services: vec![bank],
            roles: vec![Role::new("bank_read")],
        }
    }

    #[tokio::test]
    async fn test_cold_cache_is_unavailable() {
        let store = Arc::new(InMemoryStore::with_registry(bank_registry()));
        let cache = RegistryCache::new(store, Duration::from_secs(300));

        assert!(matches!(
            cache.lookup("bank", "getAccounts", &Method::GET),
            Err(LookupError::Unavailable)
        ));
        assert!(matches!(
            cache.lookup("nope", "x", &Method::GET),
            Err(LookupError::Unavailable)
        ));
        let status = cache.status();
        assert!(!status.warm);
        assert!(status.stale);
    }

    #[tokio::test]
    async fn test_refresh_installs_and_versions() {
        let store = Arc::new(InMemoryStore::with_registry(bank_registry()));
        let cache = RegistryCache::new(store.clone(), Duration::from_secs(300));

        assert_eq!(cache.refresh().await.unwrap(), 1);
        assert_eq!(cache.refresh().await.unwrap(), 2);

        let resolved = cache.lookup("bank", "getAccounts", &Method::GET).unwrap();
        assert_eq!(resolved.version, 2);

        let status = cache.status();
        assert!(status.warm);
        assert!(!status.stale);
        assert_eq!(status.version, Some(2));
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(InMemoryStore::with_registry(bank_registry()));
        let cache = RegistryCache::new(store.clone(), Duration::from_secs(300));
        cache.refresh().await.unwrap();
        let before = cache.lookup("bank", "getAccounts", &Method::GET).unwrap();

        store.set_registry_unavailable(true);
        assert!(cache.refresh().await.is_err());
        assert!(cache.refresh().await.is_err());

        let after = cache.lookup("bank", "getAccounts", &Method::GET).unwrap();
        assert_eq!(before, after);

        let status = cache.status();
        assert_eq!(status.version, Some(1));
        assert_eq!(status.consecutive_failures, 2);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_inconsistent_fetch_is_rejected_whole() {
        let store = Arc::new(InMemoryStore::with_registry(bank_registry()));
        let cache = RegistryCache::new(store.clone(), Duration::from_secs(300));
        cache.refresh().await.unwrap();

        let mut broken = bank_registry();
        broken.roles.clear();
        store.set_registry(broken);

        assert!(matches!(
            cache.refresh().await,
            Err(RefreshError::Inconsistent(_))
        ));
        // The old generation, with its own service id, still answers.
        assert!(cache.lookup("bank", "getAccounts", &Method::GET).is_ok());
    }

    #[tokio::test]
    async fn test_held_snapshot_survives_replacement() {
        let store = Arc::new(InMemoryStore::with_registry(bank_registry()));
        let cache = RegistryCache::new(store.clone(), Duration::from_secs(300));
        cache.refresh().await.unwrap();
        let held = cache.snapshot().unwrap();

        store.set_registry(RegistryData::default());
        cache.refresh().await.unwrap();

        assert!(held.lookup("bank", "getAccounts", &Method::GET).is_ok());
        assert!(matches!(
            cache.lookup("bank", "getAccounts", &Method::GET),
            Err(LookupError::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_ttl_reports_stale() {
        let store = Arc::new(InMemoryStore::with_registry(bank_registry()));
        let cache = RegistryCache::new(store, Duration::ZERO);
        cache.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let status = cache.status();
        assert!(status.stale);
        assert!(cache.lookup("bank", "getAccounts", &Method::GET).is_ok());
    }
}
