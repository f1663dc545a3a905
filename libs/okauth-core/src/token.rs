use std::fmt;
use std::time::Duration;

use okauth_utils::SecretString;

use crate::data_map::DataMap;
use crate::error::DecodeError;

/// Names of the token fields in a provider's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFields {
    pub access_token: String,
    pub expires_in: String,
    pub refresh_token: String,
    pub refresh_token_expires_in: String,
    pub scope: String,
    pub token_type: String,
}

impl Default for TokenFields {
    fn default() -> Self {
        Self {
            access_token: "access_token".to_owned(),
            expires_in: "expires_in".to_owned(),
            refresh_token: "refresh_token".to_owned(),
            refresh_token_expires_in: "refresh_token_expires_in".to_owned(),
            scope: "scope".to_owned(),
            token_type: "token_type".to_owned(),
        }
    }
}

/// Lifetimes assumed when the provider omits the corresponding field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: Option<Duration>,
    pub refresh: Option<Duration>,
}

/// A successful token response.
///
/// The access token is guaranteed non-empty. The decoded response is kept
/// in [`data`](Self::data) for provider-specific fields.
#[derive(Clone)]
pub struct OAuthToken {
    access_token: SecretString,
    access_expires_in: Option<u64>,
    refresh_token: Option<SecretString>,
    refresh_expires_in: Option<u64>,
    scope: Option<String>,
    token_type: Option<String>,
    token_id: Option<String>,
    data: DataMap,
}

impl OAuthToken {
    /// Rebuild a token from stored credentials, e.g. to refresh a token the
    /// host persisted earlier.
    #[must_use]
    pub fn new(access_token: impl Into<SecretString>, refresh_token: Option<SecretString>) -> Self {
        Self {
            access_token: access_token.into(),
            access_expires_in: None,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            refresh_expires_in: None,
            scope: None,
            token_type: None,
            token_id: None,
            data: DataMap::new(),
        }
    }

    /// Extract a token from a response already classified as a success.
    ///
    /// # Errors
    /// [`DecodeError::MissingField`] if the access token is absent or blank.
    pub fn from_data(
        data: DataMap,
        fields: &TokenFields,
        lifetimes: &TokenLifetimes,
    ) -> Result<Self, DecodeError> {
        let access_token = data
            .get_string(&fields.access_token)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DecodeError::MissingField(fields.access_token.clone()))?;

        let refresh_token = data
            .get_string(&fields.refresh_token)
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        Ok(Self {
            access_token: SecretString::from(access_token),
            access_expires_in: seconds(&data, &fields.expires_in, lifetimes.access),
            refresh_expires_in: refresh_token
                .as_ref()
                .and_then(|_| seconds(&data, &fields.refresh_token_expires_in, lifetimes.refresh)),
            refresh_token,
            scope: data.get_string(&fields.scope),
            token_type: data.get_string(&fields.token_type),
            token_id: None,
            data,
        })
    }

    #[must_use]
    pub fn with_token_id(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    /// The bearer credential. Never log it.
    #[must_use]
    pub fn access_token(&self) -> &str {
        self.access_token.expose()
    }

    #[must_use]
    pub fn access_token_expiration_seconds(&self) -> Option<u64> {
        self.access_expires_in
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(SecretString::expose)
    }

    #[must_use]
    pub fn refresh_token_expiration_seconds(&self) -> Option<u64> {
        self.refresh_expires_in
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    #[must_use]
    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    /// Cache key assigned when the issuing client has a token cache
    #[must_use]
    pub fn token_id(&self) -> Option<&str> {
        self.token_id.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &DataMap {
        &self.data
    }
}

fn seconds(data: &DataMap, field: &str, fallback: Option<Duration>) -> Option<u64> {
    data.get_i64(field)
        .and_then(|s| u64::try_from(s).ok())
        .or_else(|| fallback.map(|d| d.as_secs()))
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &self.access_token)
            .field("access_expires_in", &self.access_expires_in)
            .field("refresh_token", &self.refresh_token)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("token_id", &self.token_id)
            .field("data", &self.data)
            .finish()
    }
}
