use service_core::error::AppError;
use validator::Validate;

use crate::context::RequestContext;
use crate::dtos::auth::{RegisterRequest, RegisterResponse, VerifyRequest};
use crate::dtos::MessageResponse;
use crate::handlers::app_error;
use crate::AppState;

/// Register a new account. The verification email is sent asynchronously.
pub async fn register(
    state: &AppState,
    ctx: &RequestContext,
    req: RegisterRequest,
) -> Result<RegisterResponse, AppError> {
    req.validate()?;

    let user = state
        .auth
        .register(ctx, &req.email, &req.password, req.display_name)
        .await
        .map_err(app_error(ctx))?;

    Ok(RegisterResponse {
        user_id: user.user_id,
        message: "Registration successful. Please check your email to verify your account."
            .to_string(),
    })
}

pub async fn verify_email(
    state: &AppState,
    ctx: &RequestContext,
    req: VerifyRequest,
) -> Result<MessageResponse, AppError> {
    req.validate()?;

    state
        .auth
        .verify_email(ctx, &req.token)
        .await
        .map_err(app_error(ctx))?;

    Ok(MessageResponse::new("Email verified successfully"))
}
