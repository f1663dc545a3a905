#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! `OAuth2` client kernel for third-party open platforms.
//!
//! An [`OAuthClient`] drives the authorization-code flow for one registered
//! application: it builds the authorization URL, exchanges the returned code
//! for a token, refreshes tokens and looks up the authorizing user. What
//! differs between providers (endpoints, parameter and field names, error
//! signatures) lives in a [`ProviderConfig`]; the HTTP side goes through any
//! [`okauth_http::Transport`].
//!
//! ```ignore
//! use okauth_core::{ClientRegistry, OkAuthConfig};
//!
//! let config = OkAuthConfig::load("okauth.yaml")?;
//! let registry = ClientRegistry::from_config(&config, &[])?;
//!
//! let gitee = registry.resolve("gitee")?;
//! let redirect = gitee.init_authorize_url(&csrf_state);
//! // ... user agent comes back with ?code=...
//! let token = gitee.request_for_token(&code).await?;
//! let user = gitee.request_for_user(&token).await?;
//! ```

pub mod builtin;
mod cache;
mod client;
mod config;
mod data_map;
pub mod decoder;
mod error;
mod provider;
mod registry;
mod token;
mod user;

pub use builtin::BuiltinProvider;
pub use cache::{DEFAULT_TOKEN_TTL, TokenCache};
pub use client::{FlowState, OAuthClient};
pub use config::{CacheSettings, ClientSettings, ENV_PREFIX, HttpSettings, OkAuthConfig};
pub use data_map::DataMap;
pub use decoder::{ResponseFormat, decode, decode_as};
pub use error::{ConfigError, DecodeError, OAuthError, ProviderError, RegistryError};
pub use provider::{
    AppConfig, ErrorClassifier, ErrorDetails, FieldErrorClassifier, ProviderConfig,
    StandardEndpoints, TokenPlacement,
};
pub use registry::{ClientRegistry, ClientRegistryBuilder, ProviderFactory};
pub use token::{OAuthToken, TokenFields, TokenLifetimes};
pub use user::{OAuthUser, UserFields};
