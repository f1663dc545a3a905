//! Providers shipped with the crate.

use std::fmt;
use std::str::FromStr;

use okauth_http::HttpError;

use crate::error::RegistryError;
use crate::provider::{AppConfig, ProviderConfig};
use crate::registry::ProviderFactory;

pub mod gitee;
pub mod github;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinProvider {
    GitHub,
    Gitee,
}

impl BuiltinProvider {
    pub const ALL: [Self; 2] = [Self::GitHub, Self::Gitee];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::GitHub => github::NAME,
            Self::Gitee => gitee::NAME,
        }
    }

    /// Case-insensitive lookup by provider name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// Provider description for `app`.
    ///
    /// # Errors
    /// Only if a builtin endpoint URL fails to parse.
    pub fn config(self, app: &AppConfig) -> Result<ProviderConfig, HttpError> {
        match self {
            Self::GitHub => github::config(app),
            Self::Gitee => gitee::config(app),
        }
    }
}

impl fmt::Display for BuiltinProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinProvider {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| RegistryError::UnsupportedProvider(s.to_owned()))
    }
}

impl ProviderFactory for BuiltinProvider {
    fn type_name(&self) -> &str {
        self.name()
    }

    fn create(&self, app: &AppConfig) -> Result<ProviderConfig, HttpError> {
        self.config(app)
    }
}
