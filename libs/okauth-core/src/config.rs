//! File and environment configuration.
//!
//! ```yaml
//! http:
//!   connect_timeout: 5s
//!   read_timeout: 10s
//!   retry_times: 2
//! token_cache:
//!   default_ttl: 2h
//! clients:
//!   - provider: gitee
//!     client_id: "..."
//!     client_secret: "..."
//!     redirect_uri: "https://app.example.com/oauth/gitee/callback"
//! ```
//!
//! [`OkAuthConfig::load`] layers `OKAUTH__`-prefixed environment variables
//! over the file, with `__` separating nested keys
//! (`OKAUTH__HTTP__READ_TIMEOUT=15s`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use okauth_http::{HttpClientConfig, RetryConfig};
use okauth_utils::SecretString;
use serde::Deserialize;

use crate::cache::DEFAULT_TOKEN_TTL;
use crate::error::ConfigError;
use crate::provider::AppConfig;

pub const ENV_PREFIX: &str = "OKAUTH__";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OkAuthConfig {
    pub http: HttpSettings,
    /// Attach a shared token cache to every client when present
    pub token_cache: Option<CacheSettings>,
    pub clients: Vec<ClientSettings>,
}

/// Transport settings shared by every configured client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    #[serde(with = "okauth_utils::humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "okauth_utils::humantime_serde")]
    pub read_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub max_concurrent_requests_per_route: Option<usize>,
    pub max_idle_connections: usize,
    #[serde(with = "okauth_utils::humantime_serde::option")]
    pub max_idle_time: Option<Duration>,
    #[serde(with = "okauth_utils::humantime_serde::option")]
    pub keep_alive_timeout: Option<Duration>,
    /// Extra attempts after the first one; `0` disables retry
    pub retry_times: usize,
    /// Retry only idempotent methods, so token POSTs are never resent
    pub retry_idempotent_only: bool,
    pub proxy: Option<String>,
    pub user_agent: String,
    pub max_body_size: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = HttpClientConfig::default();
        Self {
            connect_timeout: defaults.connect_timeout,
            read_timeout: defaults.read_timeout,
            max_concurrent_requests: defaults.max_concurrent_requests,
            max_concurrent_requests_per_route: defaults.max_concurrent_requests_per_route,
            max_idle_connections: defaults.max_idle_connections,
            max_idle_time: defaults.max_idle_time,
            keep_alive_timeout: defaults.keep_alive_timeout,
            retry_times: defaults.retry.map_or(0, |r| r.max_retries),
            retry_idempotent_only: false,
            proxy: None,
            user_agent: defaults.user_agent,
            max_body_size: defaults.max_body_size,
        }
    }
}

impl HttpSettings {
    #[must_use]
    pub fn to_http_client_config(&self) -> HttpClientConfig {
        let retry = (self.retry_times > 0).then(|| RetryConfig {
            idempotent_only: self.retry_idempotent_only,
            ..RetryConfig::with_retry_times(self.retry_times)
        });
        HttpClientConfig {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            max_concurrent_requests: self.max_concurrent_requests,
            max_concurrent_requests_per_route: self.max_concurrent_requests_per_route,
            max_idle_connections: self.max_idle_connections,
            max_idle_time: self.max_idle_time,
            keep_alive_timeout: self.keep_alive_timeout,
            retry,
            proxy: self.proxy.clone(),
            user_agent: self.user_agent.clone(),
            max_body_size: self.max_body_size,
            ..HttpClientConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(with = "okauth_utils::humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

/// One provider application.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSettings {
    /// Builtin provider name or the type name of a custom factory
    pub provider: String,
    /// Registry key; defaults to `provider`
    #[serde(default)]
    pub identifier: Option<String>,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ClientSettings {
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.provider)
    }

    #[must_use]
    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

impl OkAuthConfig {
    /// Parse a YAML document. Environment variables are not consulted.
    ///
    /// # Errors
    /// [`ConfigError::Load`] for malformed YAML or mistyped fields.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(Figment::new().merge(Yaml::string(yaml)).extract()?)
    }

    /// Load `path` and apply `OKAUTH__` environment overrides.
    ///
    /// # Errors
    /// [`ConfigError::Load`] if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Invalid(format!(
                "config file '{}' does not exist",
                path.display()
            )));
        }
        let config: Self = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        tracing::debug!(clients = config.clients.len(), "okauth configuration loaded");
        Ok(config)
    }

    /// # Errors
    /// [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "http.max_concurrent_requests must be at least 1".into(),
            ));
        }
        if self.http.read_timeout.is_zero() || self.http.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid("http timeouts must be non-zero".into()));
        }

        let mut seen = HashSet::new();
        for client in &self.clients {
            if client.provider.trim().is_empty() {
                return Err(ConfigError::Invalid("client provider must not be empty".into()));
            }
            client.app_config().validate().map_err(|e| match e {
                ConfigError::Invalid(msg) => {
                    ConfigError::Invalid(format!("client '{}': {msg}", client.identifier()))
                }
                other @ ConfigError::Load(_) => other,
            })?;
            if !seen.insert(client.identifier().to_ascii_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "client identifier '{}' is configured twice",
                    client.identifier()
                )));
            }
        }
        Ok(())
    }
}
