//! Provider descriptions.
//!
//! A [`ProviderConfig`] is everything the kernel needs to talk to one open
//! platform: the basic request templates (already carrying the application's
//! credentials and the grant-type constants), the response field layouts and
//! the rule that tells an error response from a success.

use std::fmt;
use std::sync::Arc;

use okauth_http::{HttpError, RequestTemplate};
use okauth_utils::SecretString;
use serde::Deserialize;

use crate::data_map::DataMap;
use crate::decoder::ResponseFormat;
use crate::error::ConfigError;
use crate::token::{TokenFields, TokenLifetimes};
use crate::user::UserFields;

/// Credentials of an application registered with a provider.
#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl AppConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<SecretString>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// # Errors
    /// [`ConfigError::Invalid`] if a credential is blank or the redirect URI
    /// is not an absolute URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id must not be empty".into()));
        }
        if self.client_secret.is_empty() {
            return Err(ConfigError::Invalid("client_secret must not be empty".into()));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::Invalid("redirect_uri must not be empty".into()));
        }
        url::Url::parse(&self.redirect_uri).map_err(|e| {
            ConfigError::Invalid(format!("redirect_uri '{}' is invalid: {e}", self.redirect_uri))
        })?;
        Ok(())
    }
}

/// Endpoint URLs of a provider following the standard authorization-code layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    /// `None` when the provider cannot refresh tokens
    pub refresh_url: Option<String>,
    pub user_info_url: Option<String>,
}

/// Where the access token goes on a user-info request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlacement {
    /// `?<name>=<token>`
    Query { name: String },
    /// `Authorization: <scheme> <token>`
    Header { scheme: String },
}

impl TokenPlacement {
    #[must_use]
    pub fn bearer() -> Self {
        Self::Header {
            scheme: "Bearer".to_owned(),
        }
    }

    /// Attach `access_token` to `template`.
    ///
    /// # Errors
    /// `InvalidHeaderValue` when the scheme or token is not a valid header value.
    pub fn apply(
        &self,
        template: &mut RequestTemplate,
        access_token: &str,
    ) -> Result<(), HttpError> {
        match self {
            Self::Query { name } => {
                template.add_query_param(name, access_token);
            }
            Self::Header { scheme } => {
                template.add_header("authorization", &format!("{scheme} {access_token}"))?;
            }
        }
        Ok(())
    }
}

/// Error code and description extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub error: String,
    pub description: Option<String>,
}

/// Decides whether a decoded response is an error.
pub trait ErrorClassifier: Send + Sync {
    /// `Some` if `data` describes an error.
    fn classify(&self, data: &DataMap) -> Option<ErrorDetails>;

    /// Whether an error returned by the refresh endpoint means the refresh
    /// token itself is no longer usable.
    fn is_refresh_expired(&self, _details: &ErrorDetails) -> bool {
        false
    }
}

/// Classifies by the presence of a non-empty error-code field.
#[derive(Debug, Clone)]
pub struct FieldErrorClassifier {
    pub error_field: String,
    pub description_field: String,
    /// Error codes that mean the refresh token expired or was revoked
    pub refresh_expired_codes: Vec<String>,
}

impl Default for FieldErrorClassifier {
    fn default() -> Self {
        Self {
            error_field: "error".to_owned(),
            description_field: "error_description".to_owned(),
            refresh_expired_codes: Vec::new(),
        }
    }
}

impl FieldErrorClassifier {
    #[must_use]
    pub fn with_refresh_expired_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refresh_expired_codes = codes.into_iter().map(Into::into).collect();
        self
    }
}

impl ErrorClassifier for FieldErrorClassifier {
    fn classify(&self, data: &DataMap) -> Option<ErrorDetails> {
        let error = data
            .get_string(&self.error_field)
            .filter(|e| !e.trim().is_empty())?;
        Some(ErrorDetails {
            error,
            description: data
                .get_string(&self.description_field)
                .filter(|d| !d.is_empty()),
        })
    }

    fn is_refresh_expired(&self, details: &ErrorDetails) -> bool {
        self.refresh_expired_codes
            .iter()
            .any(|code| code.eq_ignore_ascii_case(&details.error))
    }
}

/// Everything the kernel knows about one provider.
///
/// Built once per registered application and then shared read-only; the
/// kernel clones a template per request and never mutates the originals.
#[derive(Clone)]
pub struct ProviderConfig {
    name: String,
    authorize: RequestTemplate,
    token: RequestTemplate,
    refresh: Option<RequestTemplate>,
    user_info: Option<RequestTemplate>,
    token_placement: TokenPlacement,
    token_fields: TokenFields,
    user_fields: UserFields,
    lifetimes: TokenLifetimes,
    format: ResponseFormat,
    classifier: Arc<dyn ErrorClassifier>,
}

impl ProviderConfig {
    /// Provider from explicit templates. The authorize and token templates
    /// must already carry the application's fixed parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, authorize: RequestTemplate, token: RequestTemplate) -> Self {
        Self {
            name: name.into(),
            authorize,
            token,
            refresh: None,
            user_info: None,
            token_placement: TokenPlacement::bearer(),
            token_fields: TokenFields::default(),
            user_fields: UserFields::default(),
            lifetimes: TokenLifetimes::default(),
            format: ResponseFormat::Auto,
            classifier: Arc::new(FieldErrorClassifier::default()),
        }
    }

    /// Provider using the standard authorization-code layout:
    ///
    /// - authorize: `GET ?response_type=code&client_id&redirect_uri[&scope]`
    /// - token: `POST grant_type=authorization_code, client_id, client_secret, redirect_uri`
    /// - refresh: `POST grant_type=refresh_token, client_id, client_secret`
    ///
    /// Scopes are joined with a single space.
    ///
    /// # Errors
    /// [`HttpError::InvalidUri`] / [`HttpError::InvalidScheme`] for bad endpoint URLs.
    pub fn standard(
        name: impl Into<String>,
        endpoints: &StandardEndpoints,
        app: &AppConfig,
    ) -> Result<Self, HttpError> {
        let mut authorize = RequestTemplate::get(&endpoints.authorize_url)?;
        authorize
            .add_query_param("response_type", "code")
            .add_query_param("client_id", &app.client_id)
            .add_query_param("redirect_uri", &app.redirect_uri);
        if !app.scopes.is_empty() {
            authorize.add_query_param("scope", &app.scopes.join(" "));
        }

        let mut token = RequestTemplate::post(&endpoints.token_url)?;
        token
            .add_param("grant_type", "authorization_code")
            .add_param("client_id", &app.client_id)
            .add_param("client_secret", app.client_secret.expose())
            .add_param("redirect_uri", &app.redirect_uri);

        let refresh = match &endpoints.refresh_url {
            Some(url) => {
                let mut refresh = RequestTemplate::post(url)?;
                refresh
                    .add_param("grant_type", "refresh_token")
                    .add_param("client_id", &app.client_id)
                    .add_param("client_secret", app.client_secret.expose());
                Some(refresh)
            }
            None => None,
        };

        let user_info = endpoints
            .user_info_url
            .as_deref()
            .map(RequestTemplate::get)
            .transpose()?;

        Ok(Self {
            refresh,
            user_info,
            ..Self::new(name, authorize, token)
        })
    }

    #[must_use]
    pub fn with_refresh(mut self, template: RequestTemplate) -> Self {
        self.refresh = Some(template);
        self
    }

    #[must_use]
    pub fn with_user_info(mut self, template: RequestTemplate) -> Self {
        self.user_info = Some(template);
        self
    }

    #[must_use]
    pub fn with_token_placement(mut self, placement: TokenPlacement) -> Self {
        self.token_placement = placement;
        self
    }

    #[must_use]
    pub fn with_token_fields(mut self, fields: TokenFields) -> Self {
        self.token_fields = fields;
        self
    }

    #[must_use]
    pub fn with_user_fields(mut self, fields: UserFields) -> Self {
        self.user_fields = fields;
        self
    }

    #[must_use]
    pub fn with_lifetimes(mut self, lifetimes: TokenLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Adjust the token template before the config is handed to a client,
    /// e.g. to add an `Accept` header.
    pub fn token_template_mut(&mut self) -> &mut RequestTemplate {
        &mut self.token
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn authorize_template(&self) -> &RequestTemplate {
        &self.authorize
    }

    #[must_use]
    pub fn token_template(&self) -> &RequestTemplate {
        &self.token
    }

    #[must_use]
    pub fn refresh_template(&self) -> Option<&RequestTemplate> {
        self.refresh.as_ref()
    }

    #[must_use]
    pub fn user_info_template(&self) -> Option<&RequestTemplate> {
        self.user_info.as_ref()
    }

    #[must_use]
    pub fn token_placement(&self) -> &TokenPlacement {
        &self.token_placement
    }

    #[must_use]
    pub fn token_fields(&self) -> &TokenFields {
        &self.token_fields
    }

    #[must_use]
    pub fn user_fields(&self) -> &UserFields {
        &self.user_fields
    }

    #[must_use]
    pub fn lifetimes(&self) -> &TokenLifetimes {
        &self.lifetimes
    }

    #[must_use]
    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    #[must_use]
    pub fn classifier(&self) -> &dyn ErrorClassifier {
        self.classifier.as_ref()
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("authorize", &self.authorize)
            .field("token", &self.token)
            .field("refresh", &self.refresh)
            .field("user_info", &self.user_info)
            .field("token_placement", &self.token_placement)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
