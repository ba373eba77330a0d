//! Credential cookies: reading the presented pair, setting a fresh one and
//! clearing both.

use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::config::CookieConfig;
use crate::services::IssuedCredentials;

/// Raw credentials as presented by the caller. Empty cookie values count as
/// absent.
#[derive(Debug, Clone, Default)]
pub struct PresentedCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialCookies {
    config: CookieConfig,
    max_age: time::Duration,
}

impl CredentialCookies {
    /// Both cookies live as long as the refresh token, so an expired access
    /// token still reaches the gateway and can trigger a rotation.
    pub fn new(config: CookieConfig, refresh_token_ttl_seconds: i64) -> Self {
        Self {
            config,
            max_age: time::Duration::seconds(refresh_token_ttl_seconds),
        }
    }

    pub fn read(&self, jar: &CookieJar) -> PresentedCredentials {
        let value = |name: &str| {
            jar.get(name)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
        };

        PresentedCredentials {
            access_token: value(&self.config.access_name),
            refresh_token: value(&self.config.refresh_name),
        }
    }

    pub fn set(&self, jar: CookieJar, credentials: &IssuedCredentials) -> CookieJar {
        jar.add(self.cookie(&self.config.access_name, credentials.access_token.clone()))
            .add(self.cookie(&self.config.refresh_name, credentials.refresh_token.clone()))
    }

    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.removal(&self.config.access_name))
            .add(self.removal(&self.config.refresh_name))
    }

    fn cookie(&self, name: &str, value: String) -> Cookie<'static> {
        let mut cookie = Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true)
            .secure(self.config.secure)
            .same_site(self.config.same_site)
            .max_age(self.max_age)
            .build();
        if let Some(domain) = &self.config.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }

    fn removal(&self, name: &str) -> Cookie<'static> {
        let mut cookie = self.cookie(name, String::new());
        cookie.make_removal();
        cookie
    }
}
