//! Test helpers for sso-gateway integration tests.
//!
//! Builds the router over the in-memory store with HS256 signing, and spins
//! up real downstream services on 127.0.0.1:0.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use axum_extra::extract::cookie::SameSite;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::Secret;
use sso_gateway::{
    build_router,
    config::{
        CookieConfig, DatabaseConfig, DownstreamConfig, Environment, GatewayConfig,
        IdentityConfig, JwtConfig, RegistryConfig, SecurityConfig, SigningAlgorithm,
    },
    models::{RegistryData, Resource, Role, Service},
    services::{
        AccessTokenClaims, IdentityProvider, IssuedCredentials, RolePolicy,
        StaticIdentityProvider,
    },
    store::InMemoryStore,
    AppState,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const ACCESS_COOKIE: &str = "sso_access";
pub const REFRESH_COOKIE: &str = "sso_refresh";

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        common: service_core::config::Config { port: 0 },
        environment: Environment::Dev,
        service_name: "sso-gateway".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            max_connections: 1,
            min_connections: 0,
        },
        jwt: JwtConfig {
            algorithm: SigningAlgorithm::Hs256,
            secret: Some(Secret::new(TEST_SECRET.to_string())),
            private_key_path: None,
            public_key_path: None,
            issuer: "sso-gateway".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 3600,
            reuse_revokes_family: true,
        },
        role_policy: RolePolicy::AnyOf,
        registry: RegistryConfig {
            refresh_interval_seconds: 30,
            ttl_seconds: 300,
        },
        downstream: DownstreamConfig {
            timeout_ms: 1000,
            connect_timeout_ms: 500,
            max_retries: 3,
        },
        identity: IdentityConfig {
            url: None,
            timeout_ms: 1000,
            max_retries: 0,
        },
        cookies: CookieConfig {
            access_name: ACCESS_COOKIE.to_string(),
            refresh_name: REFRESH_COOKIE.to_string(),
            secure: true,
            same_site: SameSite::Strict,
            domain: None,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            login_attempts: 100,
            login_window_seconds: 60,
        },
    }
}

/// The `bank` service with `getAccounts` guarded by `bank_read`, plus a few
/// helper resources on the same downstream.
pub fn bank_registry(base_address: &str) -> RegistryData {
    let bank = Service::new("bank", base_address);
    let id = bank.service_id;
    RegistryData {
        resources: vec![
            Resource::new(id, "getAccounts", "GET", &["bank_read"]),
            Resource::new(id, "transfer", "POST", &["bank_write"]),
            Resource::new(id, "slow", "*", &["bank_read"]),
            Resource::new(id, "stream", "GET", &["bank_read"]),
            Resource::new(id, "drip", "GET", &["bank_read"]),
            Resource::new(id, "echo/*", "*", &["bank_read"]),
            Resource::new(id, "public", "*", &[]),
        ],
        services: vec![bank],
        roles: vec![Role::new("bank_read"), Role::new("bank_write")],
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    /// Router with a loaded registry.
    pub async fn new(registry: RegistryData) -> Self {
        let app = Self::cold(registry);
        app.state
            .registry
            .refresh()
            .await
            .expect("initial registry refresh");
        app
    }

    /// Router whose registry has never been loaded.
    pub fn cold(registry: RegistryData) -> Self {
        Self::with_config(test_config(), registry, default_identity())
    }

    pub fn with_config(
        config: GatewayConfig,
        registry: RegistryData,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::with_registry(registry));
        let state = AppState::new(config, store.clone(), store.clone(), identity)
            .expect("failed to build app state");
        let router = build_router(state.clone());
        Self {
            router,
            state,
            store,
        }
    }

    pub async fn issue(&self, subject_id: &str, roles: &[&str]) -> IssuedCredentials {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        self.state
            .tokens
            .issue(subject_id, &roles)
            .await
            .expect("issue credentials")
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str, cookie: Option<String>) -> Response {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

pub fn default_identity() -> Arc<dyn IdentityProvider> {
    Arc::new(
        StaticIdentityProvider::new()
            .with_user("alice", "correct-horse", "user_alice", &["bank_read"])
            .with_user("bob", "battery-staple", "user_bob", &[]),
    )
}

pub fn cookie_header(access: Option<&str>, refresh: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(a) = access {
        parts.push(format!("{}={}", ACCESS_COOKIE, a));
    }
    if let Some(r) = refresh {
        parts.push(format!("{}={}", REFRESH_COOKIE, r));
    }
    parts.join("; ")
}

/// `Set-Cookie` values by cookie name.
pub fn set_cookies(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|raw| {
            let pair = raw.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn set_cookie_lines(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

pub async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("json body")
}

/// A correctly signed access token that expired a minute ago.
pub fn expired_access_token(subject_id: &str, roles: &[&str]) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = AccessTokenClaims {
        sub: subject_id.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now - 960,
        exp: now - 60,
        jti: Uuid::new_v4().to_string(),
        iss: "sso-gateway".to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("sign expired token")
}

/// Downstream test service. Every request is echoed back as JSON.
pub struct Downstream {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl Downstream {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn spawn_downstream() -> Downstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    serve_downstream(listener).await
}

pub async fn serve_downstream(listener: TcpListener) -> Downstream {
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route("/slow", any(slow))
        .route("/stream", get(stream))
        .route("/drip", get(drip))
        .fallback(echo)
        .with_state(hits.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Downstream { addr, hits }
}

/// Start a downstream on `addr` once `delay` has passed.
pub fn spawn_downstream_later(addr: SocketAddr, delay: Duration) -> tokio::task::JoinHandle<Downstream> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        serve_downstream(listener).await
    })
}

/// An address with nothing listening on it.
pub fn unused_address() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    let payload = serde_json::json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "cookie": header("cookie"),
        "x_request_id": header("x-request-id"),
        "x_forwarded_for": header("x-forwarded-for"),
        "traceparent": header("traceparent"),
        "custom": header("x-custom"),
        "host": header("host"),
        "body_len": body.len(),
        "body": String::from_utf8_lossy(&body),
    });

    (
        StatusCode::OK,
        [
            ("x-downstream", "echo"),
            ("set-cookie", "downstream_pref=1; Path=/"),
        ],
        Json(payload),
    )
        .into_response()
}

async fn slow(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3)).await;
    "finally"
}

async fn stream(State(hits): State<Arc<AtomicUsize>>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    let chunks = (0..5).map(|i| Ok::<_, std::io::Error>(Bytes::from(format!("chunk-{};", i))));
    Body::from_stream(futures::stream::iter(chunks)).into_response()
}

/// Answers at once, then trickles 8 chunks 250ms apart.
async fn drip(State(hits): State<Arc<AtomicUsize>>) -> Response {
    use futures::StreamExt;

    hits.fetch_add(1, Ordering::SeqCst);
    let chunks = futures::stream::iter(0..8).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok::<_, std::io::Error>(Bytes::from(format!("drip-{};", i)))
    });
    Body::from_stream(chunks).into_response()
}
