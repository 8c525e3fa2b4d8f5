use serde::Deserialize;
use validator::Validate;

use crate::services::{AuthorizeRequest, ExchangeRequest, RefreshRequest};

/// Query of the authorization endpoint.
#[derive(Debug, Deserialize, Validate)]
pub struct AuthorizeParams {
    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,
    #[validate(length(min = 1, message = "redirect_uri is required"))]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    #[validate(length(min = 1, message = "code_challenge is required"))]
    pub code_challenge: String,
    pub code_challenge_method: Option<String>,
}

impl From<AuthorizeParams> for AuthorizeRequest {
    fn from(params: AuthorizeParams) -> Self {
        AuthorizeRequest {
            client_id: params.client_id,
            redirect_uri: params.redirect_uri,
            scope: params.scope,
            code_challenge: params.code_challenge,
            // RFC 7636: an absent method means plain
            code_challenge_method: params
                .code_challenge_method
                .unwrap_or_else(|| "plain".to_string()),
        }
    }
}

/// Form body of the token endpoint, as sent on the wire.
#[derive(Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// A token-endpoint request after `grant_type` dispatch.
pub enum TokenGrant {
    AuthorizationCode(ExchangeRequest),
    RefreshToken(RefreshRequest),
    Unsupported(String),
}

impl TokenRequest {
    /// Missing parameters become empty strings; the grant handlers reject
    /// them with the proper OAuth error.
    pub fn into_grant(self) -> TokenGrant {
        match self.grant_type.as_str() {
            "authorization_code" => TokenGrant::AuthorizationCode(ExchangeRequest {
                code: self.code.unwrap_or_default(),
                client_id: self.client_id.unwrap_or_default(),
                client_secret: self.client_secret,
                redirect_uri: self.redirect_uri.unwrap_or_default(),
                code_verifier: self.code_verifier.unwrap_or_default(),
            }),
            "refresh_token" => TokenGrant::RefreshToken(RefreshRequest {
                refresh_token: self.refresh_token.unwrap_or_default(),
                client_id: self.client_id,
                client_secret: self.client_secret,
            }),
            _ => TokenGrant::Unsupported(self.grant_type),
        }
    }
}
