use service_core::error::AppError;
use validator::Validate;

use crate::context::RequestContext;
use crate::dtos::auth::{ChangePasswordRequest, PasswordResetConfirm, PasswordResetRequest};
use crate::dtos::MessageResponse;
use crate::handlers::app_error;
use crate::services::TokenPair;
use crate::AppState;

/// Same answer whether or not the address is registered.
pub async fn request_password_reset(
    state: &AppState,
    ctx: &RequestContext,
    req: PasswordResetRequest,
) -> Result<MessageResponse, AppError> {
    req.validate()?;

    state
        .auth
        .request_password_reset(ctx, &req.email)
        .await
        .map_err(app_error(ctx))?;

    Ok(MessageResponse::new(
        "If your email is registered, you will receive a password reset link shortly.",
    ))
}

pub async fn confirm_password_reset(
    state: &AppState,
    ctx: &RequestContext,
    req: PasswordResetConfirm,
) -> Result<MessageResponse, AppError> {
    req.validate()?;

    state
        .auth
        .confirm_password_reset(ctx, &req.token, &req.new_password)
        .await
        .map_err(app_error(ctx))?;

    Ok(MessageResponse::new(
        "Password has been reset. Please sign in with your new password.",
    ))
}

/// Requires an authenticated context. Returns a fresh pair for the context's
/// organization, since every earlier session is revoked.
pub async fn change_password(
    state: &AppState,
    ctx: &RequestContext,
    req: ChangePasswordRequest,
) -> Result<Option<TokenPair>, AppError> {
    state
        .auth
        .change_password(ctx, &req.current_password, &req.new_password)
        .await
        .map_err(app_error(ctx))
}
