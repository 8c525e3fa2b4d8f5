use service_core::error::AppError;
use validator::Validate;

use crate::context::RequestContext;
use crate::dtos::oauth::{AuthorizeParams, TokenGrant, TokenRequest};
use crate::handlers::app_error;
use crate::services::{AuthorizationGrant, OAuthError, RefreshRequest, ServiceError, TokenPair};
use crate::AppState;

/// Authorization endpoint. `ctx` must carry the authenticated user; the
/// returned code is bound to the client, redirect URI and PKCE challenge.
pub async fn authorize(
    state: &AppState,
    ctx: &RequestContext,
    params: AuthorizeParams,
) -> Result<AuthorizationGrant, AppError> {
    params.validate().map_err(|e| {
        app_error(ctx)(ServiceError::OAuth(OAuthError::InvalidRequest(e.to_string())))
    })?;

    state
        .oauth
        .authorize(ctx, params.into())
        .await
        .map_err(app_error(ctx))
}

/// Token endpoint, dispatching on `grant_type`.
pub async fn exchange_token(
    state: &AppState,
    ctx: &RequestContext,
    req: TokenRequest,
) -> Result<TokenPair, AppError> {
    let result = match req.into_grant() {
        TokenGrant::AuthorizationCode(exchange) => {
            state.oauth.exchange_code_for_tokens(ctx, exchange).await
        }
        TokenGrant::RefreshToken(refresh) => state.oauth.refresh_tokens(ctx, refresh).await,
        TokenGrant::Unsupported(grant_type) => {
            tracing::warn!(
                grant_type = %grant_type,
                correlation_id = %ctx.correlation_id,
                "Unsupported grant type"
            );
            Err(OAuthError::UnsupportedGrantType(grant_type).into())
        }
    };
    result.map_err(app_error(ctx))
}

/// Rotate a refresh token outside the token endpoint (first-party sessions).
pub async fn refresh(
    state: &AppState,
    ctx: &RequestContext,
    refresh_token: &str,
) -> Result<TokenPair, AppError> {
    state
        .oauth
        .refresh_tokens(
            ctx,
            RefreshRequest {
                refresh_token: refresh_token.to_string(),
                client_id: None,
                client_secret: None,
            },
        )
        .await
        .map_err(app_error(ctx))
}
