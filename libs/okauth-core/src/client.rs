//! The OAuth client kernel.
//!
//! One [`OAuthClient`] per registered application. It owns the provider's
//! basic templates behind an `Arc`, copies one per call, adds the per-call
//! parameter (`state`, `code`, `refresh_token`, the access token) and hands
//! the copy to the [`Transport`]. Responses are decoded once and classified
//! by the provider's [`ErrorClassifier`](crate::ErrorClassifier).

use std::sync::Arc;
use std::time::Duration;

use okauth_http::{RequestTemplate, Transport};
use url::Url;
use uuid::Uuid;

use crate::cache::TokenCache;
use crate::data_map::DataMap;
use crate::decoder;
use crate::error::{OAuthError, ProviderError};
use crate::provider::{ErrorDetails, ProviderConfig};
use crate::token::OAuthToken;
use crate::user::OAuthUser;

/// Stage of an authorization flow, attached to tracing events as `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AuthorizeUrlBuilt,
    TokenRequested,
    RefreshRequested,
    UserInfoRequested,
    TokenObtained,
    UserObtained,
    ErrorObtained,
    RefreshExpired,
}

impl FlowState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AuthorizeUrlBuilt => "authorize_url_built",
            Self::TokenRequested => "token_requested",
            Self::RefreshRequested => "refresh_requested",
            Self::UserInfoRequested => "user_info_requested",
            Self::TokenObtained => "token_obtained",
            Self::UserObtained => "user_obtained",
            Self::ErrorObtained => "error_obtained",
            Self::RefreshExpired => "refresh_expired",
        }
    }
}

/// Client for one provider application.
///
/// Cheap to clone; clones share the provider config, transport and cache.
#[derive(Clone)]
pub struct OAuthClient {
    provider: Arc<ProviderConfig>,
    transport: Arc<dyn Transport>,
    cache: Option<TokenCache>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("provider", &self.provider.name())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    #[must_use]
    pub fn new(provider: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        tracing::trace!(
            provider = provider.name(),
            state = FlowState::Idle.as_str(),
            "oauth client created"
        );
        Self {
            provider: Arc::new(provider),
            transport,
            cache: None,
        }
    }

    /// Store every obtained token in `cache` under a fresh token id.
    #[must_use]
    pub fn with_cache(mut self, cache: TokenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// Authorization URL the user agent is redirected to. No I/O; calling it
    /// twice with the same `state` yields the same URL.
    #[must_use]
    pub fn init_authorize_url(&self, state: &str) -> Url {
        let mut template = self.provider.authorize_template().clone();
        template.add_query_param("state", state);
        tracing::debug!(
            provider = self.name(),
            state = FlowState::AuthorizeUrlBuilt.as_str(),
            "authorize url built"
        );
        template.url().clone()
    }

    /// Exchange an authorization code for a token.
    ///
    /// # Errors
    /// - [`OAuthError::Transport`] / [`OAuthError::Decode`] forwarded unchanged
    /// - [`OAuthError::Provider`] if the response carries an error code
    pub async fn request_for_token(&self, code: &str) -> Result<OAuthToken, OAuthError> {
        let mut request = self.provider.token_template().clone();
        request.add_param("code", code);

        let data = self.call(request, FlowState::TokenRequested).await?;
        if let Some(details) = self.provider.classifier().classify(&data) {
            return Err(self.rejected(details));
        }
        self.obtained(data)
    }

    /// Obtain a new token with the refresh token carried by `token`.
    ///
    /// # Errors
    /// - [`OAuthError::RefreshNotSupported`] if the provider has no refresh endpoint
    /// - [`OAuthError::MissingRefreshToken`] if `token` has no refresh token
    /// - [`OAuthError::RefreshTokenExpired`] if the provider reports the
    ///   refresh token as expired or revoked
    /// - otherwise as [`request_for_token`](Self::request_for_token)
    pub async fn refresh_token(&self, token: &OAuthToken) -> Result<OAuthToken, OAuthError> {
        let Some(template) = self.provider.refresh_template() else {
            return Err(OAuthError::RefreshNotSupported {
                provider: self.name().to_owned(),
            });
        };
        let refresh_token = token.refresh_token().ok_or(OAuthError::MissingRefreshToken)?;

        let mut request = template.clone();
        request.add_param("refresh_token", refresh_token);

        let data = self.call(request, FlowState::RefreshRequested).await?;
        if let Some(details) = self.provider.classifier().classify(&data) {
            if self.provider.classifier().is_refresh_expired(&details) {
                tracing::info!(
                    provider = self.name(),
                    state = FlowState::RefreshExpired.as_str(),
                    error = %details.error,
                    "refresh token no longer usable"
                );
                return Err(OAuthError::RefreshTokenExpired {
                    provider: self.name().to_owned(),
                });
            }
            return Err(self.rejected(details));
        }
        self.obtained(data)
    }

    /// Look up the user who authorized `token`.
    ///
    /// # Errors
    /// - [`OAuthError::UserInfoNotSupported`] if the provider has no user endpoint
    /// - [`OAuthError::Provider`] if the response carries an error code
    /// - [`OAuthError::Decode`] if the response has no user id
    pub async fn request_for_user(&self, token: &OAuthToken) -> Result<OAuthUser, OAuthError> {
        let template = self
            .provider
            .user_info_template()
            .ok_or_else(|| OAuthError::UserInfoNotSupported {
                provider: self.name().to_owned(),
            })?;

        let mut request = template.clone();
        self.provider
            .token_placement()
            .apply(&mut request, token.access_token())?;

        let data = self.call(request, FlowState::UserInfoRequested).await?;
        if let Some(details) = self.provider.classifier().classify(&data) {
            return Err(self.rejected(details));
        }
        let user = OAuthUser::from_data(data, self.provider.user_fields())?;
        tracing::debug!(
            provider = self.name(),
            state = FlowState::UserObtained.as_str(),
            open_id = user.open_id(),
            "user info obtained"
        );
        Ok(user)
    }

    /// Token previously stored under `token_id`, if a cache is attached and
    /// the entry has not expired.
    #[must_use]
    pub fn cached_token(&self, token_id: &str) -> Option<OAuthToken> {
        self.cache.as_ref()?.get(token_id)
    }

    async fn call(&self, request: RequestTemplate, state: FlowState) -> Result<DataMap, OAuthError> {
        tracing::debug!(
            provider = self.name(),
            state = state.as_str(),
            method = %request.method(),
            host = request.url().host_str().unwrap_or_default(),
            "calling provider"
        );

        let response = self.transport.execute(request).await?;
        let data = decoder::decode_as(
            self.provider.format(),
            response.content_type().as_deref(),
            response.body(),
        )?;

        if !response.status().is_success() && self.provider.classifier().classify(&data).is_none() {
            tracing::warn!(
                provider = self.name(),
                status = response.status().as_u16(),
                "provider answered with a non-success status but no error code"
            );
        }
        Ok(data)
    }

    fn rejected(&self, details: ErrorDetails) -> OAuthError {
        tracing::warn!(
            provider = self.name(),
            state = FlowState::ErrorObtained.as_str(),
            error = %details.error,
            "provider returned an error"
        );
        OAuthError::Provider(ProviderError {
            provider: self.name().to_owned(),
            error: details.error,
            description: details.description,
        })
    }

    fn obtained(&self, data: DataMap) -> Result<OAuthToken, OAuthError> {
        let mut token = OAuthToken::from_data(
            data,
            self.provider.token_fields(),
            self.provider.lifetimes(),
        )?;

        if let Some(cache) = &self.cache {
            let token_id = Uuid::new_v4().to_string();
            token = token.with_token_id(token_id.clone());
            let ttl = token
                .access_token_expiration_seconds()
                .map(Duration::from_secs);
            cache.save(token_id, token.clone(), ttl);
        }

        tracing::debug!(
            provider = self.name(),
            state = FlowState::TokenObtained.as_str(),
            expires_in = token.access_token_expiration_seconds(),
            "token obtained"
        );
        Ok(token)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::provider::{AppConfig, FieldErrorClassifier, StandardEndpoints, TokenPlacement};
    use async_trait::async_trait;
    use http::{HeaderMap, HeaderValue, StatusCode, header};
    use okauth_http::{HttpError, HttpResponse};
    use okauth_utils::SecretString;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays canned responses and records every request.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        seen: Mutex<Vec<RequestTemplate>>,
    }

    impl Scripted {
        fn json(self, status: u16, body: &'static str) -> Self {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            let status = StatusCode::from_u16(status).unwrap();
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(HttpResponse::new(status, headers, body)));
            self
        }

        fn fail(self, err: HttpError) -> Self {
            self.responses.lock().unwrap().push_back(Err(err));
            self
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last(&self) -> RequestTemplate {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn execute(&self, request: RequestTemplate) -> Result<HttpResponse, HttpError> {
            self.seen.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(HttpError::ServiceClosed))
        }
    }

    fn provider() -> ProviderConfig {
        let app = AppConfig::new("cid", "csecret", "https://app.example.com/cb").with_scopes(["user"]);
        ProviderConfig::standard(
            "demo",
            &StandardEndpoints {
                authorize_url: "https://id.example.com/oauth/authorize".into(),
                token_url: "https://id.example.com/oauth/token".into(),
                refresh_url: Some("https://id.example.com/oauth/token".into()),
                user_info_url: Some("https://api.example.com/user".into()),
            },
            &app,
        )
        .unwrap()
        .with_classifier(Arc::new(
            FieldErrorClassifier::default().with_refresh_expired_codes(["invalid_grant"]),
        ))
    }

    fn client(transport: &Arc<Scripted>) -> OAuthClient {
        OAuthClient::new(provider(), Arc::clone(transport) as Arc<dyn Transport>)
    }

    #[test]
    fn authorize_url_is_idempotent_and_leaves_template_untouched() {
        let client = client(&Arc::new(Scripted::default()));
        let before = client.provider().authorize_template().url().clone();

        let first = client.init_authorize_url("xyz");
        let second = client.init_authorize_url("xyz");

        assert_eq!(first, second);
        assert_eq!(client.provider().authorize_template().url(), &before);
        assert!(first.query_pairs().any(|(k, v)| k == "state" && v == "xyz"));
        assert!(first.query_pairs().any(|(k, v)| k == "response_type" && v == "code"));
        assert_eq!(first.query_pairs().filter(|(k, _)| k == "state").count(), 1);
    }

    #[tokio::test]
    async fn token_exchange_adds_code_to_a_copy() {
        let transport = Arc::new(Scripted::default().json(
            200,
            r#"{"access_token":"at","expires_in":86400,"refresh_token":"rt","scope":"user"}"#,
        ));
        let client = client(&transport);

        let token = client.request_for_token("c0de").await.unwrap();
        assert_eq!(token.access_token(), "at");
        assert_eq!(token.refresh_token(), Some("rt"));
        assert!(token.token_id().is_none());

        let sent = transport.last();
        assert_eq!(sent.form_param("code"), Some("c0de"));
        assert_eq!(sent.form_param("grant_type"), Some("authorization_code"));
        assert!(client.provider().token_template().form_param("code").is_none());
    }

    #[tokio::test]
    async fn error_field_wins_over_status() {
        let transport = Arc::new(Scripted::default().json(
            200,
            r#"{"error":"invalid_client","error_description":"bad secret"}"#,
        ));
        let err = client(&transport).request_for_token("c").await.unwrap_err();
        let provider_error = err.provider_error().unwrap();
        assert_eq!(provider_error.error, "invalid_client");
        assert_eq!(provider_error.description.as_deref(), Some("bad secret"));
    }

    #[tokio::test]
    async fn success_without_access_token_is_a_decode_error() {
        let transport = Arc::new(Scripted::default().json(400, r#"{"message":"oops"}"#));
        let err = client(&transport).request_for_token("c").await.unwrap_err();
        assert!(matches!(err, OAuthError::Decode(crate::DecodeError::MissingField(_))));
    }

    #[tokio::test]
    async fn transport_errors_are_forwarded() {
        let transport = Arc::new(Scripted::default().fail(HttpError::Timeout(Duration::from_secs(1))));
        let err = client(&transport).request_for_token("c").await.unwrap_err();
        assert!(matches!(err, OAuthError::Transport(HttpError::Timeout(_))));
    }

    #[tokio::test]
    async fn refresh_expired_is_distinguished() {
        let transport = Arc::new(
            Scripted::default()
                .json(400, r#"{"error":"invalid_grant"}"#)
                .json(401, r#"{"error":"invalid_client"}"#),
        );
        let client = client(&transport);
        let token = OAuthToken::new("at", Some(SecretString::from("rt")));

        let err = client.refresh_token(&token).await.unwrap_err();
        assert!(err.is_refresh_expired());
        assert_eq!(transport.last().form_param("refresh_token"), Some("rt"));
        assert_eq!(transport.last().form_param("grant_type"), Some("refresh_token"));

        let err = client.refresh_token(&token).await.unwrap_err();
        assert!(!err.is_refresh_expired());
        assert!(err.is_provider_error());
    }

    #[tokio::test]
    async fn refresh_preconditions() {
        let transport = Arc::new(Scripted::default());
        let client = client(&transport);
        let err = client.refresh_token(&OAuthToken::new("at", None)).await.unwrap_err();
        assert!(matches!(err, OAuthError::MissingRefreshToken));

        let app = AppConfig::new("cid", "s", "https://app.example.com/cb");
        let no_refresh = ProviderConfig::standard(
            "norefresh",
            &StandardEndpoints {
                authorize_url: "https://id.example.com/a".into(),
                token_url: "https://id.example.com/t".into(),
                refresh_url: None,
                user_info_url: None,
            },
            &app,
        )
        .unwrap();
        let client = OAuthClient::new(no_refresh, Arc::clone(&transport) as Arc<dyn Transport>);
        let token = OAuthToken::new("at", Some(SecretString::from("rt")));
        assert!(matches!(
            client.refresh_token(&token).await,
            Err(OAuthError::RefreshNotSupported { .. })
        ));
        assert!(matches!(
            client.request_for_user(&token).await,
            Err(OAuthError::UserInfoNotSupported { .. })
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn user_lookup_places_token() {
        let transport = Arc::new(
            Scripted::default()
                .json(200, r#"{"id":42,"name":"octo","avatar_url":"https://a/1.png"}"#)
                .json(200, r#"{"id":"u-1","name":"cat"}"#),
        );
        let token = OAuthToken::new("tok", None);

        let header_client = OAuthClient::new(
            provider().with_token_placement(TokenPlacement::Header {
                scheme: "token".into(),
            }),
            Arc::clone(&transport) as Arc<dyn Transport>,
        );
        let user = header_client.request_for_user(&token).await.unwrap();
        assert_eq!(user.open_id(), "42");
        assert_eq!(transport.last().header("authorization").unwrap(), "token tok");

        let query_client = OAuthClient::new(
            provider().with_token_placement(TokenPlacement::Query {
                name: "access_token".into(),
            }),
            Arc::clone(&transport) as Arc<dyn Transport>,
        );
        let user = query_client.request_for_user(&token).await.unwrap();
        assert_eq!(user.nickname(), Some("cat"));
        assert_eq!(transport.last().query_param("access_token").as_deref(), Some("tok"));
        assert!(transport.last().header("authorization").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_stores_obtained_tokens() {
        let transport = Arc::new(
            Scripted::default().json(200, r#"{"access_token":"at","expires_in":60}"#),
        );
        let client = client(&transport).with_cache(TokenCache::default());

        let token = client.request_for_token("c").await.unwrap();
        let id = token.token_id().unwrap().to_owned();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(client.cached_token(&id).unwrap().access_token(), "at");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(client.cached_token(&id).is_none());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn secrets_stay_out_of_logs() {
        let transport = Arc::new(
            Scripted::default().json(200, r#"{"access_token":"gho_topsecret","expires_in":60}"#),
        );
        client(&transport).request_for_token("c0de-value").await.unwrap();
        assert!(logs_contain("token_obtained"));
        assert!(!logs_contain("gho_topsecret"));
        assert!(!logs_contain("csecret"));
        assert!(!logs_contain("c0de-value"));
    }

    #[test]
    fn client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OAuthClient>();
    }
}
