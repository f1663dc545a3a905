use std::sync::Arc;
use std::time::Duration;

use okauth_http::HttpError;

use crate::provider::{
    AppConfig, FieldErrorClassifier, ProviderConfig, StandardEndpoints, TokenPlacement,
};
use crate::token::TokenLifetimes;

pub const NAME: &str = "gitee";

pub const AUTHORIZE_URL: &str = "https://gitee.com/oauth/authorize";
pub const TOKEN_URL: &str = "https://gitee.com/oauth/token";
pub const USER_INFO_URL: &str = "https://gitee.com/api/v5/user";

/// Gitee does not report refresh-token expiry; it is documented as seven days.
const REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub(super) fn config(app: &AppConfig) -> Result<ProviderConfig, HttpError> {
    let endpoints = StandardEndpoints {
        authorize_url: AUTHORIZE_URL.to_owned(),
        token_url: TOKEN_URL.to_owned(),
        refresh_url: Some(TOKEN_URL.to_owned()),
        user_info_url: Some(USER_INFO_URL.to_owned()),
    };

    Ok(ProviderConfig::standard(NAME, &endpoints, app)?
        .with_lifetimes(TokenLifetimes {
            access: None,
            refresh: Some(REFRESH_TOKEN_LIFETIME),
        })
        .with_token_placement(TokenPlacement::Query {
            name: "access_token".to_owned(),
        })
        .with_classifier(Arc::new(
            FieldErrorClassifier::default().with_refresh_expired_codes(["invalid_grant"]),
        )))
}
