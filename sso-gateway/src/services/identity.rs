//! Credential-issuing identity backend.
//!
//! The gateway never sees password hashes; it hands the login attempt to the
//! identity backend and receives the subject and its roles.

use async_trait::async_trait;
use http::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use service_core::observability::inject_trace_context;
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::IdentityConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid credentials")]
    AuthFailed,

    #[error("Identity backend unavailable: {0}")]
    Unavailable(String),

    #[error("Identity backend timed out")]
    Timeout,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, login: &str, password: &str) -> Result<Identity, IdentityError>;
}

/// Identity backend reached over HTTP with a JSON POST.
pub struct HttpIdentityProvider {
    client: Client,
    url: String,
    retry: RetryConfig,
}

// Connect failures are the only retryable outcome.
enum Attempt {
    Connect(String),
    Failed(IdentityError),
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Connect(msg) => write!(f, "connect error: {}", msg),
            Attempt::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl HttpIdentityProvider {
    pub fn new(url: impl Into<String>, config: &IdentityConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build identity client: {}", e))?;

        Ok(Self {
            client,
            url: url.into(),
            retry: RetryConfig::with_max_retries(config.max_retries),
        })
    }

    async fn attempt(&self, login: &str, password: &str) -> Result<Identity, Attempt> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&serde_json::json!({ "login": login, "password": password }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Attempt::Failed(IdentityError::Timeout)
                } else if e.is_connect() {
                    Attempt::Connect(e.to_string())
                } else {
                    Attempt::Failed(IdentityError::Unavailable(e.to_string()))
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Attempt::Failed(IdentityError::AuthFailed));
        }
        if status.is_client_error() {
            tracing::warn!(status = %status, "Identity backend rejected login request");
            return Err(Attempt::Failed(IdentityError::AuthFailed));
        }
        if !status.is_success() {
            return Err(Attempt::Failed(IdentityError::Unavailable(format!(
                "identity backend returned {}",
                status
            ))));
        }

        response.json::<Identity>().await.map_err(|e| {
            if e.is_timeout() {
                Attempt::Failed(IdentityError::Timeout)
            } else {
                Attempt::Failed(IdentityError::Unavailable(format!(
                    "invalid identity response: {}",
                    e
                )))
            }
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, login: &str, password: &str) -> Result<Identity, IdentityError> {
        // The login call has no side effects, so connection-level retries
        // are safe.
        let result = retry_with_backoff(
            &self.retry,
            "identity.authenticate",
            |e: &Attempt| matches!(e, Attempt::Connect(_)),
            || self.attempt(login, password),
        )
        .await;

        result.map_err(|e| match e {
            Attempt::Connect(msg) => {
                tracing::error!(url = %self.url, error = %msg, "Identity backend unreachable");
                IdentityError::Unavailable(msg)
            }
            Attempt::Failed(e) => e,
        })
    }
}

/// Fixed user table for local development and tests.
#[derive(Default)]
pub struct StaticIdentityProvider {
    users: HashMap<String, (String, Identity)>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, login: &str, password: &str, subject_id: &str, roles: &[&str]) -> Self {
        self.users.insert(
            login.to_string(),
            (
                password.to_string(),
                Identity {
                    subject_id: subject_id.to_string(),
                    roles: roles.iter().map(|r| r.to_string()).collect(),
                },
            ),
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, login: &str, password: &str) -> Result<Identity, IdentityError> {
        match self.users.get(login) {
            Some((expected, identity)) if expected == password => Ok(identity.clone()),
            _ => Err(IdentityError::AuthFailed),
        }
    }
}
