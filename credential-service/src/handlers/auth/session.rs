use service_core::error::AppError;
use validator::Validate;

use crate::context::RequestContext;
use crate::dtos::auth::{IntrospectRequest, LoginRequest, LogoutRequest};
use crate::dtos::MessageResponse;
use crate::handlers::app_error;
use crate::services::{AccessTokenClaims, IntrospectResponse, TokenPair};
use crate::AppState;

/// Password login into one organization.
pub async fn authenticate(
    state: &AppState,
    ctx: &RequestContext,
    req: LoginRequest,
) -> Result<TokenPair, AppError> {
    req.validate()?;

    state
        .auth
        .authenticate(ctx, &req.email, &req.password, req.organization_id)
        .await
        .map_err(app_error(ctx))
}

/// Validate a bearer access token and bind its principal and organization
/// to the context.
pub async fn authenticate_bearer(
    state: &AppState,
    ctx: RequestContext,
    bearer: &str,
) -> Result<(RequestContext, AccessTokenClaims), AppError> {
    let claims = state
        .tokens
        .validate(&ctx, bearer)
        .await
        .map_err(app_error(&ctx))?;
    let user_id = claims.user_id().map_err(app_error(&ctx))?;
    let organization_id = claims.organization_id().map_err(app_error(&ctx))?;

    Ok((
        ctx.with_user(user_id).with_organization(organization_id),
        claims,
    ))
}

pub async fn logout(
    state: &AppState,
    ctx: &RequestContext,
    claims: &AccessTokenClaims,
    req: LogoutRequest,
) -> Result<MessageResponse, AppError> {
    state
        .auth
        .logout(ctx, claims, req.refresh_token.as_deref())
        .await
        .map_err(app_error(ctx))?;

    Ok(MessageResponse::new("Logged out successfully"))
}

/// Never fails on a bad token; only malformed requests are rejected.
pub async fn introspect(
    state: &AppState,
    ctx: &RequestContext,
    req: IntrospectRequest,
) -> Result<IntrospectResponse, AppError> {
    req.validate()?;
    Ok(state.auth.introspect(ctx, &req.token).await)
}
