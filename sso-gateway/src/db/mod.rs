//! Database module for PostgreSQL connection management.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Create a PostgreSQL connection pool.
///
/// The pool connects lazily so the gateway can start while the database is
/// down; the registry stays cold (503) until the first refresh succeeds.
pub fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Configuring PostgreSQL pool");

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_lazy(&config.url)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Run migrations in the background until they succeed, retrying every
/// `retry_interval`. Resolves to `false` if `shutdown` fires first.
///
/// Registry refreshes fail on the missing tables until this completes, so
/// the gateway stays cold rather than stuck.
pub fn spawn_migrations(
    pool: PgPool,
    retry_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return false,
                result = run_migrations(&pool) => match result {
                    Ok(()) => return true,
                    Err(e) => tracing::warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = retry_interval.as_millis() as u64,
                        "Database migrations failed; retrying"
                    ),
                },
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(retry_interval) => {}
            }
        }
    })
}

/// Check database health.
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        let config = DatabaseConfig {
            url: "postgres://localhost:1/unreachable".to_string(),
            max_connections: 2,
            min_connections: 0,
        };

        assert!(create_pool(&config).is_ok());
    }

    #[tokio::test]
    async fn test_migrations_retry_until_shutdown() {
        let config = DatabaseConfig {
            url: "postgres://localhost:1/unreachable".to_string(),
            max_connections: 2,
            min_connections: 0,
        };
        let pool = create_pool(&config).unwrap();
        let shutdown = CancellationToken::new();

        let handle = spawn_migrations(pool, Duration::from_millis(10), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        let migrated = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("migration task ignored shutdown")
            .unwrap();
        assert!(!migrated);
    }
}
