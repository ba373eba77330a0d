//! Header rewriting between the caller and a downstream service.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use service_core::observability::propagate_trace_headers;
use std::net::IpAddr;

use crate::config::CookieConfig;

/// Connection-scoped headers (RFC 9110 section 7.6.1); the transport
/// re-frames every hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Which inbound headers and cookies never reach a downstream service.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    stripped_cookies: Vec<String>,
}

impl HeaderPolicy {
    pub fn new(stripped_cookies: Vec<String>) -> Self {
        Self { stripped_cookies }
    }

    /// Strip the gateway's own credential cookies.
    pub fn for_cookies(cookies: &CookieConfig) -> Self {
        Self::new(vec![cookies.access_name.clone(), cookies.refresh_name.clone()])
    }

    /// Headers for the outbound request to a downstream service.
    pub fn outbound_request_headers(&self, incoming: &HeaderMap, peer: Option<IpAddr>) -> HeaderMap {
        let mut out = HeaderMap::with_capacity(incoming.len() + 2);
        let connection_listed = connection_tokens(incoming);

        for (name, value) in incoming {
            if is_hop_by_hop(name)
                || name == header::HOST
                || name == header::COOKIE
                || connection_listed.iter().any(|t| t == name.as_str())
            {
                continue;
            }
            out.append(name.clone(), value.clone());
        }

        if let Some(cookie) = self.filtered_cookie_header(incoming) {
            out.insert(header::COOKIE, cookie);
        }

        if let Some(host) = incoming.get(header::HOST) {
            if !out.contains_key(X_FORWARDED_HOST) {
                out.insert(X_FORWARDED_HOST, host.clone());
            }
        }

        if let Some(ip) = peer {
            let forwarded_for = match incoming
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
            {
                Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
                _ => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                out.insert(X_FORWARDED_FOR, value);
            }
        }

        propagate_trace_headers(incoming, &mut out);
        out
    }

    /// Headers of a downstream response as returned to the caller.
    pub fn response_headers(&self, downstream: &HeaderMap) -> HeaderMap {
        let connection_listed = connection_tokens(downstream);
        let mut out = HeaderMap::with_capacity(downstream.len());
        for (name, value) in downstream {
            if is_hop_by_hop(name) || connection_listed.iter().any(|t| t == name.as_str()) {
                continue;
            }
            out.append(name.clone(), value.clone());
        }
        out
    }

    /// Merge every `Cookie` header, dropping stripped names. `None` when
    /// nothing remains.
    fn filtered_cookie_header(&self, incoming: &HeaderMap) -> Option<HeaderValue> {
        let kept: Vec<&str> = incoming
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let name = pair.split_once('=').map_or(*pair, |(n, _)| n).trim();
                !self.stripped_cookies.iter().any(|s| s == name)
            })
            .collect();

        if kept.is_empty() {
            return None;
        }
        HeaderValue::from_str(&kept.join("; ")).ok()
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| h == name)
}

/// Header names listed in `Connection`, lowercased.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
