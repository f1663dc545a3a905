use std::fmt;

use okauth_http::HttpError;
use thiserror::Error;

/// A response body that could not be turned into a [`DataMap`](crate::DataMap)
/// or lacks a field every success must carry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON body is {0}, expected an object")]
    NotAnObject(&'static str),

    #[error("body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A `key=value` segment without `=`; carries the segment position only
    #[error("malformed form body: segment {0} has no '='")]
    MalformedForm(usize),

    #[error("response is missing required field '{0}'")]
    MissingField(String),
}

/// Error reported by the provider in an otherwise well-formed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub provider: String,
    pub error: String,
    pub description: Option<String>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned error '{}'", self.provider, self.error)?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}

/// Failure of a kernel operation.
///
/// Transport and decode failures are forwarded untouched; everything else is
/// the kernel's classification of what the provider said.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OAuthError {
    #[error("request to provider failed: {0}")]
    Transport(#[from] HttpError),

    #[error("undecodable provider response: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Provider(ProviderError),

    /// The refresh token itself is unusable; the user has to authorize again.
    #[error("refresh token for {provider} has expired, re-authorization required")]
    RefreshTokenExpired { provider: String },

    #[error("{provider} does not support token refresh")]
    RefreshNotSupported { provider: String },

    #[error("token has no refresh token")]
    MissingRefreshToken,

    #[error("{provider} has no user-info endpoint")]
    UserInfoNotSupported { provider: String },
}

impl OAuthError {
    #[must_use]
    pub fn is_refresh_expired(&self) -> bool {
        matches!(self, Self::RefreshTokenExpired { .. })
    }

    #[must_use]
    pub fn is_provider_error(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::RefreshTokenExpired { .. })
    }

    #[must_use]
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid or unloadable configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The identifier is already bound; the first registration is kept.
    #[error("provider identifier '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build provider transport: {0}")]
    Http(#[from] HttpError),
}
