pub mod config;
pub mod db;
pub mod dtos;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod proxy;
pub mod registry;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::gateway::{CredentialCookies, Gateway};
use crate::proxy::Forwarder;
use crate::registry::RegistryCache;
use crate::services::{Authorizer, IdentityProvider, JwtService, TokenAuthority};
use crate::store::{RefreshTokenStore, RegistryStore};

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<RegistryCache>,
    pub tokens: Arc<TokenAuthority>,
    pub identity: Arc<dyn IdentityProvider>,
    pub gateway: Arc<Gateway>,
    pub cookies: CredentialCookies,
    pub login_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the pipeline components from configuration and collaborators.
    pub fn new(
        config: GatewayConfig,
        registry_store: Arc<dyn RegistryStore>,
        token_store: Arc<dyn RefreshTokenStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, anyhow::Error> {
        let registry = Arc::new(RegistryCache::new(registry_store, config.registry.ttl()));

        let jwt = JwtService::new(&config.jwt)?;
        let tokens = Arc::new(TokenAuthority::new(jwt, token_store, &config.jwt));

        let cookies = CredentialCookies::new(
            config.cookies.clone(),
            config.jwt.refresh_token_ttl_seconds,
        );
        let forwarder = Forwarder::new(&config.downstream, &config.cookies)?;
        let gateway = Arc::new(Gateway::new(
            registry.clone(),
            tokens.clone(),
            Authorizer::new(config.role_policy),
            forwarder,
            cookies.clone(),
        ));

        let login_rate_limiter = create_ip_rate_limiter(
            config.security.login_attempts,
            config.security.login_window_seconds,
        );

        Ok(Self {
            config,
            registry,
            tokens,
            identity,
            gateway,
            cookies,
            login_rate_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let auth_routes = Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .merge(login_route)
        .layer(cors_layer(&state.config.security.allowed_origins));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(auth_routes)
        .fallback(handlers::proxy::proxy)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}

/// CORS for the session endpoints only; proxied services answer their own
/// preflights.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) if o != "*" => Some(value),
            Ok(_) => {
                tracing::warn!("Wildcard CORS origin ignored: credentials require explicit origins");
                None
            }
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.status();
    let (status, label) = if registry.warm {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "service": state.config.service_name,
            "version": state.config.service_version,
            "environment": format!("{:?}", state.config.environment),
            "registry": registry,
        })),
    )
}
