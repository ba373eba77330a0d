use service_core::error::AppError;
use service_core::observability::init_tracing;
use sso_gateway::{
    build_router,
    config::GatewayConfig,
    db,
    registry::spawn_refresher,
    services::{metrics::init_metrics, HttpIdentityProvider, IdentityProvider, StaticIdentityProvider},
    store::PgStore,
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = GatewayConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    init_metrics().map_err(AppError::InternalError)?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        role_policy = ?config.role_policy,
        "Starting SSO gateway"
    );

    let shutdown = CancellationToken::new();

    // The gateway still starts when the database is down. Migrations and
    // the refresher both keep retrying, and /health reports 503 until the
    // registry loads.
    let pool = db::create_pool(&config.database).map_err(|e| AppError::DatabaseError(e.into()))?;
    let migrations = db::spawn_migrations(
        pool.clone(),
        config.registry.refresh_interval(),
        shutdown.clone(),
    );
    let store = Arc::new(PgStore::new(pool));

    let identity: Arc<dyn IdentityProvider> = match &config.identity.url {
        Some(url) => {
            tracing::info!(url = %url, "Using HTTP identity backend");
            Arc::new(HttpIdentityProvider::new(url.clone(), &config.identity).map_err(AppError::ConfigError)?)
        }
        None => {
            tracing::warn!("IDENTITY_URL not set; logins are disabled in this environment");
            Arc::new(StaticIdentityProvider::new())
        }
    };

    let state = AppState::new(config.clone(), store.clone(), store, identity)
        .map_err(AppError::ConfigError)?;

    let refresher = spawn_refresher(
        state.registry.clone(),
        config.registry.refresh_interval(),
        shutdown.clone(),
    );

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    if let Err(e) = refresher.await {
        tracing::error!(error = %e, "Registry refresher task failed");
    }
    match migrations.await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Shut down before database migrations completed"),
        Err(e) => tracing::error!(error = %e, "Migration task failed"),
    }

    tracing::info!("Gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
