//! Streaming pass-through to downstream services.

mod headers;

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::response::Response;
use http::Method;
use reqwest::{redirect, Client, Url};
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{CookieConfig, DownstreamConfig};
use crate::models::Service;

pub use headers::HeaderPolicy;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Downstream service '{service}' failed: {message}")]
    BadGateway { service: String, message: String },

    #[error("Downstream service '{service}' timed out")]
    GatewayTimeout { service: String },
}

pub struct Forwarder {
    client: Client,
    policy: HeaderPolicy,
    retry: RetryConfig,
    response_timeout: Duration,
}

/// Failure of one attempt to obtain the downstream response head.
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("no response headers within {0:?}")]
    Timeout(Duration),
}

impl AttemptError {
    fn is_connect(&self) -> bool {
        matches!(self, AttemptError::Transport(e) if e.is_connect())
    }

    fn is_timeout(&self) -> bool {
        match self {
            AttemptError::Transport(e) => e.is_timeout(),
            AttemptError::Timeout(_) => true,
        }
    }
}

impl Forwarder {
    pub fn new(config: &DownstreamConfig, cookies: &CookieConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .redirect(redirect::Policy::none())
            .no_proxy()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build downstream client: {}", e))?;

        Ok(Self {
            client,
            policy: HeaderPolicy::for_cookies(cookies),
            retry: RetryConfig::with_max_retries(config.max_retries),
            response_timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Bound the wait for the response head. The body that follows is
    /// streamed without a deadline.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, AttemptError> {
        match tokio::time::timeout(self.response_timeout, builder.send()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AttemptError::Timeout(self.response_timeout)),
        }
    }

    /// Send `request` to `service` at `resource_path` (the part of the
    /// inbound path after the service segment) and stream the answer back.
    ///
    /// Downstream statuses are returned as-is; only transport failures
    /// become errors.
    pub async fn forward(
        &self,
        request: Request,
        service: &Service,
        resource_path: &str,
        peer: Option<IpAddr>,
    ) -> Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();
        let url = target_url(service, resource_path, parts.uri.query())?;
        let headers = self.policy.outbound_request_headers(&parts.headers, peer);
        let method = parts.method;

        // Only a request that can be rebuilt from scratch may be retried.
        let replayable = is_safe_method(&method) && body.size_hint().exact() == Some(0);

        let started = Instant::now();
        let result = if replayable {
            retry_with_backoff(
                &self.retry,
                "proxy.forward",
                |e: &AttemptError| e.is_connect(),
                || {
                    self.send(
                        self.client
                            .request(method.clone(), url.clone())
                            .headers(headers.clone()),
                    )
                },
            )
            .await
        } else {
            self.send(
                self.client
                    .request(method.clone(), url)
                    .headers(headers)
                    .body(reqwest::Body::wrap_stream(body.into_data_stream())),
            )
            .await
        };

        let elapsed = started.elapsed();
        metrics::histogram!(
            "proxy_upstream_duration_seconds",
            "service" => service.service_name.clone()
        )
        .record(elapsed.as_secs_f64());

        let upstream = result.map_err(|e| {
            warn!(
                service = %service.service_name,
                method = %method,
                error = %e,
                timeout = e.is_timeout(),
                connect = e.is_connect(),
                "Downstream request failed"
            );
            if e.is_timeout() {
                ForwardError::GatewayTimeout {
                    service: service.service_name.clone(),
                }
            } else {
                ForwardError::BadGateway {
                    service: service.service_name.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        debug!(
            service = %service.service_name,
            status = upstream.status().as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Downstream responded"
        );

        let status = upstream.status();
        let headers = self.policy.response_headers(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Base address + resource path + original query, with the path kept
/// byte-for-byte as received.
fn target_url(service: &Service, resource_path: &str, query: Option<&str>) -> Result<Url, ForwardError> {
    let mut target = String::with_capacity(
        service.base_address.len() + resource_path.len() + query.map_or(0, |q| q.len() + 1) + 1,
    );
    target.push_str(service.base_address.trim_end_matches('/'));
    if !resource_path.starts_with('/') {
        target.push('/');
    }
    target.push_str(resource_path);
    if let Some(q) = query {
        target.push('?');
        target.push_str(q);
    }

    Url::parse(&target).map_err(|e| ForwardError::BadGateway {
        service: service.service_name.clone(),
        message: format!("invalid target URL: {}", e),
    })
}
