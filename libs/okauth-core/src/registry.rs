//! Provider registry.
//!
//! Maps an application identifier to its [`OAuthClient`]. The map is filled
//! once through [`ClientRegistryBuilder`] and read-only afterwards, so a
//! built [`ClientRegistry`] can be shared across tasks without locking.

use std::collections::HashMap;
use std::sync::Arc;

use okauth_http::{HttpClientBuilder, HttpError, Transport};

use crate::builtin::BuiltinProvider;
use crate::cache::TokenCache;
use crate::client::OAuthClient;
use crate::config::OkAuthConfig;
use crate::error::RegistryError;
use crate::provider::{AppConfig, ProviderConfig};

/// Produces the provider description for one application.
pub trait ProviderFactory: Send + Sync {
    /// Provider type, used by qualified registry keys (`type:identifier`)
    /// and matched against `provider` in configuration files.
    fn type_name(&self) -> &str;

    /// # Errors
    /// [`HttpError`] if an endpoint URL of the provider is invalid.
    fn create(&self, app: &AppConfig) -> Result<ProviderConfig, HttpError>;
}

struct Registered {
    type_name: String,
    client: OAuthClient,
}

#[derive(Default)]
pub struct ClientRegistryBuilder {
    entries: HashMap<String, Registered>,
    cache: Option<TokenCache>,
}

impl ClientRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `cache` among clients registered after this call.
    #[must_use]
    pub fn with_cache(mut self, cache: TokenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register an application under `identifier` (case-insensitive).
    ///
    /// # Errors
    /// - [`RegistryError::DuplicateRegistration`] if `identifier` is taken;
    ///   the existing registration is left intact
    /// - [`RegistryError::Config`] if `app` is invalid
    /// - [`RegistryError::Http`] if the factory rejects its endpoints
    pub fn register(
        &mut self,
        identifier: &str,
        factory: &dyn ProviderFactory,
        app: &AppConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<&mut Self, RegistryError> {
        let key = normalize(identifier);
        if self.entries.contains_key(&key) {
            return Err(RegistryError::DuplicateRegistration(key));
        }
        app.validate()?;
        let provider = factory.create(app)?;
        let mut client = OAuthClient::new(provider, transport);
        if let Some(cache) = &self.cache {
            client = client.with_cache(cache.clone());
        }
        self.insert(key, factory.type_name(), client);
        Ok(self)
    }

    /// Register a client assembled by the caller.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateRegistration`] if `identifier` is taken.
    pub fn register_client(
        &mut self,
        identifier: &str,
        type_name: &str,
        client: OAuthClient,
    ) -> Result<&mut Self, RegistryError> {
        let key = normalize(identifier);
        if self.entries.contains_key(&key) {
            return Err(RegistryError::DuplicateRegistration(key));
        }
        self.insert(key, type_name, client);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> ClientRegistry {
        tracing::info!(clients = self.entries.len(), "oauth client registry built");
        ClientRegistry {
            entries: self.entries,
        }
    }

    fn insert(&mut self, key: String, type_name: &str, client: OAuthClient) {
        tracing::debug!(identifier = %key, provider = type_name, "oauth client registered");
        self.entries.insert(
            key,
            Registered {
                type_name: type_name.to_owned(),
                client,
            },
        );
    }
}

/// Read-only map from identifier to client.
pub struct ClientRegistry {
    entries: HashMap<String, Registered>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("identifiers", &self.identifiers())
            .finish_non_exhaustive()
    }
}

impl ClientRegistry {
    #[must_use]
    pub fn builder() -> ClientRegistryBuilder {
        ClientRegistryBuilder::new()
    }

    /// Build a registry from configuration: one shared [`okauth_http::HttpClient`]
    /// for every client, providers resolved against `custom` factories first
    /// and the builtin ones second.
    ///
    /// Must run inside a Tokio runtime (the HTTP client spawns its buffer worker).
    ///
    /// # Errors
    /// - [`RegistryError::Config`] if the configuration does not validate
    /// - [`RegistryError::UnsupportedProvider`] for an unknown provider name
    /// - [`RegistryError::Http`] if the HTTP client cannot be built
    pub fn from_config(
        config: &OkAuthConfig,
        custom: &[Arc<dyn ProviderFactory>],
    ) -> Result<Self, RegistryError> {
        config.validate()?;

        let http = HttpClientBuilder::with_config(config.http.to_http_client_config()).build()?;
        let transport: Arc<dyn Transport> = Arc::new(http);

        let mut builder = Self::builder();
        if let Some(cache) = &config.token_cache {
            builder = builder.with_cache(TokenCache::new(cache.default_ttl));
        }

        for client in &config.clients {
            let app = client.app_config();
            let transport = Arc::clone(&transport);
            let factory = custom
                .iter()
                .find(|f| f.type_name().eq_ignore_ascii_case(client.provider.trim()));
            if let Some(factory) = factory {
                builder.register(client.identifier(), factory.as_ref(), &app, transport)?;
            } else {
                let builtin: BuiltinProvider = client.provider.parse()?;
                builder.register(client.identifier(), &builtin, &app, transport)?;
            }
        }
        Ok(builder.build())
    }

    /// Client registered under `key`.
    ///
    /// `key` is either the identifier or `type:identifier`; in the qualified
    /// form the type must match the registered provider type.
    ///
    /// # Errors
    /// [`RegistryError::UnsupportedProvider`] if nothing matches.
    pub fn resolve(&self, key: &str) -> Result<&OAuthClient, RegistryError> {
        if let Some(entry) = self.entries.get(&normalize(key)) {
            return Ok(&entry.client);
        }
        if let Some((type_name, identifier)) = split_qualified(key.trim())
            && let Some(entry) = self.entries.get(&normalize(identifier))
            && entry.type_name.eq_ignore_ascii_case(type_name.trim())
        {
            return Ok(&entry.client);
        }
        Err(RegistryError::UnsupportedProvider(key.to_owned()))
    }

    /// Registered identifiers, sorted
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(identifier: &str) -> String {
    identifier.trim().to_ascii_lowercase()
}

/// Split `type:identifier` at the last `:` that is not part of a `::` path
/// separator, so Rust type paths work as provider types.
fn split_qualified(key: &str) -> Option<(&str, &str)> {
    let bytes = key.as_bytes();
    key.rmatch_indices(':')
        .map(|(idx, _)| idx)
        .find(|&idx| {
            let before = idx.checked_sub(1).and_then(|i| bytes.get(i));
            let after = bytes.get(idx + 1);
            before != Some(&b':') && after != Some(&b':')
        })
        .map(|idx| (&key[..idx], &key[idx + 1..]))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::provider::StandardEndpoints;
    use async_trait::async_trait;
    use okauth_http::{HttpResponse, RequestTemplate};

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn execute(&self, _request: RequestTemplate) -> Result<HttpResponse, HttpError> {
            Err(HttpError::ServiceClosed)
        }
    }

    struct Corporate;

    impl ProviderFactory for Corporate {
        fn type_name(&self) -> &str {
            "acme::sso::Corporate"
        }

        fn create(&self, app: &AppConfig) -> Result<ProviderConfig, HttpError> {
            ProviderConfig::standard(
                "corporate",
                &StandardEndpoints {
                    authorize_url: "https://sso.acme.example/authorize".into(),
                    token_url: "https://sso.acme.example/token".into(),
                    refresh_url: None,
                    user_info_url: None,
                },
                app,
            )
        }
    }

    fn app(client_id: &str) -> AppConfig {
        AppConfig::new(client_id, "secret", "https://app.example.com/cb")
    }

    fn transport() -> Arc<dyn Transport> {
        Arc::new(Unreachable)
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let mut builder = ClientRegistry::builder();
        builder
            .register("github", &BuiltinProvider::GitHub, &app("first"), transport())
            .unwrap();
        let err = builder
            .register("GitHub", &BuiltinProvider::Gitee, &app("second"), transport())
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::DuplicateRegistration(ref id) if id == "github"));

        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        let client = registry.resolve("github").unwrap();
        assert_eq!(client.name(), "github");
        assert_eq!(
            client.provider().authorize_template().query_param("client_id").as_deref(),
            Some("first")
        );
    }

    #[test]
    fn qualified_keys_must_match_type() {
        let mut builder = ClientRegistry::builder();
        builder
            .register("sso", &Corporate, &app("c"), transport())
            .unwrap()
            .register("gitee-admin", &BuiltinProvider::Gitee, &app("g"), transport())
            .unwrap();
        let registry = builder.build();

        assert!(registry.resolve("SSO").is_ok());
        assert!(registry.resolve("acme::sso::Corporate:sso").is_ok());
        assert!(registry.resolve("gitee:gitee-admin").is_ok());
        assert!(matches!(
            registry.resolve("github:gitee-admin"),
            Err(RegistryError::UnsupportedProvider(_))
        ));
        assert!(matches!(
            registry.resolve("nope"),
            Err(RegistryError::UnsupportedProvider(k)) if k == "nope"
        ));
        assert_eq!(registry.identifiers(), vec!["gitee-admin", "sso"]);
    }

    #[test]
    fn invalid_app_is_rejected() {
        let mut builder = ClientRegistry::builder();
        let err = builder
            .register("github", &BuiltinProvider::GitHub, &app(""), transport())
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Config(_)));
        assert!(builder.build().is_empty());
    }

    #[test]
    fn split_ignores_path_separators() {
        assert_eq!(split_qualified("gitee:admin"), Some(("gitee", "admin")));
        assert_eq!(split_qualified("a::b::C:x"), Some(("a::b::C", "x")));
        assert_eq!(split_qualified("a::b"), None);
        assert_eq!(split_qualified("plain"), None);
    }

    #[test]
    fn registry_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientRegistry>();
    }
}
