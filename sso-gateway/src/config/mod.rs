use axum_extra::extract::cookie::SameSite;
use secrecy::Secret;
use service_core::config::{self as core_config, get_env, get_env_opt, get_env_parsed};
use service_core::error::AppError;
use std::time::Duration;

use crate::services::RolePolicy;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub role_policy: RolePolicy,
    pub registry: RegistryConfig,
    pub downstream: DownstreamConfig,
    pub identity: IdentityConfig,
    pub cookies: CookieConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    Hs256,
    Rs256,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub algorithm: SigningAlgorithm,
    pub secret: Option<Secret<String>>,
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
    pub issuer: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    /// Revoke every token of a family when reuse of a consumed refresh
    /// token is detected.
    pub reuse_revokes_family: bool,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub refresh_interval_seconds: u64,
    pub ttl_seconds: u64,
}

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct DownstreamConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub access_name: String,
    pub refresh_name: String,
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            access_name: "sso_access".to_string(),
            refresh_name: "sso_refresh".to_string(),
            secure: true,
            same_site: SameSite::Strict,
            domain: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub login_attempts: u32,
    pub login_window_seconds: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = get_env("ENVIRONMENT", Some("dev"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let algorithm: SigningAlgorithm = get_env("JWT_ALGORITHM", Some("HS256"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let config = GatewayConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("sso-gateway"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: get_env_opt("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, false)?,
                max_connections: get_env_parsed("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: get_env_parsed("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            jwt: JwtConfig {
                algorithm,
                secret: get_env_opt("JWT_SECRET").map(Secret::new),
                private_key_path: get_env_opt("JWT_PRIVATE_KEY_PATH"),
                public_key_path: get_env_opt("JWT_PUBLIC_KEY_PATH"),
                issuer: get_env("JWT_ISSUER", Some("sso-gateway"), false)?,
                access_token_ttl_seconds: get_env_parsed("ACCESS_TOKEN_TTL_SECONDS", "900")?,
                refresh_token_ttl_seconds: get_env_parsed("REFRESH_TOKEN_TTL_SECONDS", "604800")?,
                reuse_revokes_family: get_env_parsed("REUSE_REVOKES_FAMILY", "true")?,
            },
            role_policy: get_env("ROLE_POLICY", Some("any_of"), false)?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            registry: RegistryConfig {
                refresh_interval_seconds: get_env_parsed(
                    "REFRESH_RESOURCES_INTERVAL_SECONDS",
                    "30",
                )?,
                ttl_seconds: get_env_parsed("REFRESH_RESOURCES_TTL_SECONDS", "300")?,
            },
            downstream: DownstreamConfig {
                timeout_ms: get_env_parsed("DOWNSTREAM_TIMEOUT_MS", "30000")?,
                connect_timeout_ms: get_env_parsed("DOWNSTREAM_CONNECT_TIMEOUT_MS", "2000")?,
                max_retries: get_env_parsed("DOWNSTREAM_MAX_RETRIES", "2")?,
            },
            identity: IdentityConfig {
                url: get_env_opt("IDENTITY_URL"),
                timeout_ms: get_env_parsed("IDENTITY_TIMEOUT_MS", "5000")?,
                max_retries: get_env_parsed("IDENTITY_MAX_RETRIES", "2")?,
            },
            cookies: CookieConfig {
                access_name: get_env("COOKIE_ACCESS_NAME", Some("sso_access"), false)?,
                refresh_name: get_env("COOKIE_REFRESH_NAME", Some("sso_refresh"), false)?,
                secure: get_env_parsed("COOKIE_SECURE", "true")?,
                same_site: parse_same_site(&get_env("COOKIE_SAME_SITE", Some("strict"), false)?)?,
                domain: get_env_opt("COOKIE_DOMAIN"),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    false,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                login_attempts: get_env_parsed("RATE_LIMIT_LOGIN_ATTEMPTS", "5")?,
                login_window_seconds: get_env_parsed("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900")?,
            },
        };

        if config.is_prod() && config.identity.url.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IDENTITY_URL is required in production but not set"
            )));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_ttl_seconds <= 0 {
            return Err(config_error("ACCESS_TOKEN_TTL_SECONDS must be positive"));
        }

        if self.jwt.refresh_token_ttl_seconds <= self.jwt.access_token_ttl_seconds {
            return Err(config_error(
                "REFRESH_TOKEN_TTL_SECONDS must be greater than ACCESS_TOKEN_TTL_SECONDS",
            ));
        }

        match self.jwt.algorithm {
            SigningAlgorithm::Hs256 if self.jwt.secret.is_none() => {
                return Err(config_error("JWT_SECRET is required for HS256"));
            }
            SigningAlgorithm::Rs256
                if self.jwt.private_key_path.is_none() || self.jwt.public_key_path.is_none() =>
            {
                return Err(config_error(
                    "JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH are required for RS256",
                ));
            }
            _ => {}
        }

        if self.registry.refresh_interval_seconds == 0 {
            return Err(config_error(
                "REFRESH_RESOURCES_INTERVAL_SECONDS must be positive",
            ));
        }

        if self.registry.ttl_seconds < self.registry.refresh_interval_seconds {
            tracing::warn!(
                ttl = self.registry.ttl_seconds,
                interval = self.registry.refresh_interval_seconds,
                "Registry TTL is shorter than the refresh interval; snapshots will report stale between ticks"
            );
        }

        if self.downstream.timeout_ms == 0 || self.identity.timeout_ms == 0 {
            return Err(config_error("Outbound timeouts must be positive"));
        }

        if self.cookies.access_name == self.cookies.refresh_name {
            return Err(config_error(
                "COOKIE_ACCESS_NAME and COOKIE_REFRESH_NAME must differ",
            ));
        }

        if self.is_prod() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if !self.cookies.secure {
                tracing::error!("COOKIE_SECURE is disabled in production; credentials may travel over plain HTTP");
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn parse_same_site(value: &str) -> Result<SameSite, AppError> {
    match value.to_lowercase().as_str() {
        "strict" => Ok(SameSite::Strict),
        "lax" => Ok(SameSite::Lax),
        other => Err(AppError::ConfigError(anyhow::anyhow!(
            "Invalid COOKIE_SAME_SITE: {} (expected strict or lax)",
            other
        ))),
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HS256" => Ok(SigningAlgorithm::Hs256),
            "RS256" => Ok(SigningAlgorithm::Rs256),
            _ => Err(format!("Invalid JWT algorithm: {}", s)),
        }
    }
}
