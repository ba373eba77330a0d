//! Per-request pipeline: resolve the resource, authenticate (rotating once
//! if needed), authorize, forward.

mod credentials;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{field, info, warn, Instrument, Span};

use crate::proxy::{ForwardError, Forwarder};
use crate::registry::{LookupError, RegistryCache};
use crate::services::{
    AccessTokenClaims, Authorizer, IssuedCredentials, RotateError, TokenAuthority, TokenError,
};

pub use credentials::{CredentialCookies, PresentedCredentials};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("Authentication required")]
    MissingCredentials,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Rotate(#[from] RotateError),

    #[error("Insufficient role for this resource")]
    Forbidden,

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl GatewayError {
    /// Metric label for the terminal state.
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::Lookup(LookupError::Unavailable) => "unavailable",
            GatewayError::Lookup(_) => "not_found",
            GatewayError::MissingCredentials | GatewayError::Token(_) => "unauthorized",
            GatewayError::Rotate(RotateError::Store(_) | RotateError::Issue(_)) => "error",
            GatewayError::Rotate(_) => "unauthorized",
            GatewayError::Forbidden => "forbidden",
            GatewayError::Forward(ForwardError::BadGateway { .. }) => "bad_gateway",
            GatewayError::Forward(ForwardError::GatewayTimeout { .. }) => "gateway_timeout",
        }
    }

    /// The presented credentials are dead and the caller should drop them.
    pub fn clears_credentials(&self) -> bool {
        matches!(self, GatewayError::Rotate(e) if e.is_terminal_for_session())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Lookup(LookupError::Unavailable) => {
                AppError::ServiceUnavailable("Resource registry not yet loaded".to_string())
            }
            GatewayError::Lookup(e) => AppError::NotFound(anyhow::anyhow!(e)),
            GatewayError::MissingCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
            }
            GatewayError::Token(e) => e.into(),
            GatewayError::Rotate(e) => e.into(),
            GatewayError::Forbidden => {
                AppError::Forbidden(anyhow::anyhow!("Insufficient role for this resource"))
            }
            GatewayError::Forward(ForwardError::BadGateway { service, .. }) => {
                AppError::BadGateway(format!("service '{}' is unreachable", service))
            }
            GatewayError::Forward(ForwardError::GatewayTimeout { service }) => {
                AppError::GatewayTimeout(format!("service '{}' did not respond in time", service))
            }
        }
    }
}

/// Split `/{service}/{resource...}` into the service name and the raw
/// remainder (leading slash kept, possibly empty).
pub fn split_service_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (service, rest) = match trimmed.find('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
        None => (trimmed, ""),
    };
    if service.is_empty() {
        None
    } else {
        Some((service, rest))
    }
}

pub struct Gateway {
    registry: Arc<RegistryCache>,
    tokens: Arc<TokenAuthority>,
    authorizer: Authorizer,
    forwarder: Forwarder,
    cookies: CredentialCookies,
}

impl Gateway {
    pub fn new(
        registry: Arc<RegistryCache>,
        tokens: Arc<TokenAuthority>,
        authorizer: Authorizer,
        forwarder: Forwarder,
        cookies: CredentialCookies,
    ) -> Self {
        Self {
            registry,
            tokens,
            authorizer,
            forwarder,
            cookies,
        }
    }

    /// Run one proxied request through the pipeline. Every failure is
    /// terminal and rendered as the matching HTTP error.
    pub async fn handle(&self, request: Request, peer: Option<IpAddr>) -> Response {
        let span = tracing::info_span!(
            "gateway.request",
            method = %request.method(),
            path = %request.uri().path(),
            service = field::Empty,
            subject = field::Empty,
            outcome = field::Empty,
        );

        async move {
            let started = Instant::now();
            let mut jar = CookieJar::from_headers(request.headers());

            let result = self.process(request, &mut jar, peer).await;

            let outcome = match &result {
                Ok(_) => "forwarded",
                Err(e) => e.outcome(),
            };
            Span::current().record("outcome", outcome);
            metrics::counter!("gateway_requests_total", "outcome" => outcome).increment(1);
            metrics::histogram!("gateway_request_duration_seconds", "outcome" => outcome)
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(response) => (jar, response).into_response(),
                Err(err) => {
                    if err.clears_credentials() {
                        jar = self.cookies.clear(jar);
                    }
                    (jar, AppError::from(err)).into_response()
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        request: Request,
        jar: &mut CookieJar,
        peer: Option<IpAddr>,
    ) -> Result<Response, GatewayError> {
        let path = request.uri().path().to_string();
        let (service_name, resource_path) = split_service_path(&path)
            .ok_or_else(|| LookupError::ServiceNotFound(String::new()))?;

        let resolved = self
            .registry
            .lookup(service_name, resource_path, request.method())?;
        Span::current().record("service", service_name);

        let presented = self.cookies.read(jar);
        let (claims, rotated) = self.authenticate(&presented).await?;
        Span::current().record("subject", claims.sub.as_str());

        // New credentials go out even if a later step fails; the old refresh
        // token is already consumed.
        if let Some(credentials) = rotated {
            *jar = self.cookies.set(jar.clone(), &credentials);
        }

        if !self
            .authorizer
            .authorize(&claims.roles, &resolved.required_roles)
            .is_allowed()
        {
            info!(
                subject = %claims.sub,
                resource_id = %resolved.resource_id,
                "Access denied by role policy"
            );
            return Err(GatewayError::Forbidden);
        }

        let response = self
            .forwarder
            .forward(request, &resolved.service, resource_path, peer)
            .await?;
        Ok(response)
    }

    async fn authenticate(
        &self,
        presented: &PresentedCredentials,
    ) -> Result<(AccessTokenClaims, Option<IssuedCredentials>), GatewayError> {
        let access_error = match presented.access_token.as_deref() {
            Some(token) => match self.tokens.validate(token) {
                Ok(claims) => return Ok((claims, None)),
                Err(TokenError::Expired) => TokenError::Expired,
                Err(e) => {
                    warn!(error = %e, "Rejected access token");
                    return Err(e.into());
                }
            },
            None => {
                if presented.refresh_token.is_none() {
                    return Err(GatewayError::MissingCredentials);
                }
                TokenError::Expired
            }
        };

        let Some(refresh_token) = presented.refresh_token.as_deref() else {
            return Err(access_error.into());
        };

        let credentials = self.tokens.rotate(refresh_token).await?;
        metrics::counter!("gateway_rotations_total").increment(1);
        Ok((credentials.claims.clone(), Some(credentials)))
    }
}
