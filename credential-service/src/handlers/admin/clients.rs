use service_core::error::AppError;
use validator::Validate;

use crate::context::RequestContext;
use crate::dtos::admin::CreateClientRequest;
use crate::handlers::admin::require;
use crate::handlers::app_error;
use crate::services::rbac::permissions;
use crate::services::{RegisteredClient, RotatedSecret};
use crate::AppState;

/// The plaintext secret in the response is never available again.
pub async fn register_client(
    state: &AppState,
    ctx: &RequestContext,
    req: CreateClientRequest,
) -> Result<RegisteredClient, AppError> {
    req.validate()?;
    require(state, ctx, permissions::CLIENTS_MANAGE).await?;

    state
        .clients
        .register_client(ctx, req.into())
        .await
        .map_err(app_error(ctx))
}

pub async fn rotate_client_secret(
    state: &AppState,
    ctx: &RequestContext,
    client_id: &str,
) -> Result<RotatedSecret, AppError> {
    require(state, ctx, permissions::CLIENTS_MANAGE).await?;

    state
        .clients
        .rotate_client_secret(ctx, client_id)
        .await
        .map_err(app_error(ctx))
}

pub async fn disable_client(
    state: &AppState,
    ctx: &RequestContext,
    client_id: &str,
) -> Result<(), AppError> {
    require(state, ctx, permissions::CLIENTS_MANAGE).await?;

    state
        .clients
        .disable_client(ctx, client_id)
        .await
        .map_err(app_error(ctx))
}
