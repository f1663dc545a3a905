use std::time::Duration;

use okauth_http::HttpError;

use crate::provider::{AppConfig, ProviderConfig, StandardEndpoints, TokenPlacement};
use crate::token::TokenLifetimes;
use crate::user::UserFields;

pub const NAME: &str = "github";

pub const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
pub const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const USER_INFO_URL: &str = "https://api.github.com/user";

/// GitHub OAuth apps issue non-expiring tokens; treat them as valid for a day.
const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// GitHub OAuth app.
///
/// The token endpoint answers form-encoded unless JSON is requested, there is
/// no refresh grant, and the user endpoint expects `Authorization: token <t>`.
pub(super) fn config(app: &AppConfig) -> Result<ProviderConfig, HttpError> {
    let endpoints = StandardEndpoints {
        authorize_url: AUTHORIZE_URL.to_owned(),
        token_url: TOKEN_URL.to_owned(),
        refresh_url: None,
        user_info_url: Some(USER_INFO_URL.to_owned()),
    };

    let mut provider = ProviderConfig::standard(NAME, &endpoints, app)?
        .with_lifetimes(TokenLifetimes {
            access: Some(ACCESS_TOKEN_LIFETIME),
            refresh: None,
        })
        .with_token_placement(TokenPlacement::Header {
            scheme: "token".to_owned(),
        })
        .with_user_fields(UserFields {
            open_id: "id".to_owned(),
            nickname: "login".to_owned(),
            avatar_url: "avatar_url".to_owned(),
        });
    provider.token_template_mut().accept_json();
    Ok(provider)
}
