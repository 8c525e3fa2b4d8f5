use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::context::RequestContext;
use crate::dtos::admin::{CreatePermissionRequest, RoleRequest};
use crate::handlers::admin::require;
use crate::handlers::app_error;
use crate::models::{Permission, Role};
use crate::services::rbac::permissions;
use crate::AppState;

pub async fn create_role(
    state: &AppState,
    ctx: &RequestContext,
    req: RoleRequest,
) -> Result<Role, AppError> {
    req.validate()?;
    require(state, ctx, permissions::ROLES_MANAGE).await?;

    state
        .rbac
        .create_custom_role(ctx, &req.name)
        .await
        .map_err(app_error(ctx))
}

pub async fn update_role(
    state: &AppState,
    ctx: &RequestContext,
    role_id: Uuid,
    req: RoleRequest,
) -> Result<Role, AppError> {
    req.validate()?;
    require(state, ctx, permissions::ROLES_MANAGE).await?;

    state
        .rbac
        .update_role(ctx, role_id, &req.name)
        .await
        .map_err(app_error(ctx))
}

/// Fails while any active membership still holds the role.
pub async fn delete_role(state: &AppState, ctx: &RequestContext, role_id: Uuid) -> Result<(), AppError> {
    require(state, ctx, permissions::ROLES_MANAGE).await?;

    state
        .rbac
        .delete_role(ctx, role_id)
        .await
        .map_err(app_error(ctx))
}

/// System roles plus the organization's custom roles.
pub async fn list_roles(state: &AppState, ctx: &RequestContext) -> Result<Vec<Role>, AppError> {
    require(state, ctx, permissions::ROLES_READ).await?;

    state.rbac.list_roles(ctx).await.map_err(app_error(ctx))
}

pub async fn create_permission(
    state: &AppState,
    ctx: &RequestContext,
    req: CreatePermissionRequest,
) -> Result<Permission, AppError> {
    req.validate()?;
    require(state, ctx, permissions::ROLES_MANAGE).await?;

    state
        .rbac
        .create_custom_permission(ctx, &req.name, &req.category)
        .await
        .map_err(app_error(ctx))
}

pub async fn delete_permission(
    state: &AppState,
    ctx: &RequestContext,
    permission_id: Uuid,
) -> Result<(), AppError> {
    require(state, ctx, permissions::ROLES_MANAGE).await?;

    state
        .rbac
        .delete_permission(ctx, permission_id)
        .await
        .map_err(app_error(ctx))
}

pub async fn list_permissions(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<Vec<Permission>, AppError> {
    require(state, ctx, permissions::ROLES_READ).await?;

    state.rbac.list_permissions(ctx).await.map_err(app_error(ctx))
}

pub async fn assign_permission(
    state: &AppState,
    ctx: &RequestContext,
    role_id: Uuid,
    permission_id: Uuid,
) -> Result<(), AppError> {
    require(state, ctx, permissions::ROLES_MANAGE).await?;

    state
        .rbac
        .assign_permission(ctx, role_id, permission_id)
        .await
        .map_err(app_error(ctx))
}

pub async fn revoke_permission(
    state: &AppState,
    ctx: &RequestContext,
    role_id: Uuid,
    permission_id: Uuid,
) -> Result<bool, AppError> {
    require(state, ctx, permissions::ROLES_MANAGE).await?;

    state
        .rbac
        .revoke_permission(ctx, role_id, permission_id)
        .await
        .map_err(app_error(ctx))
}

pub async fn list_role_permissions(
    state: &AppState,
    ctx: &RequestContext,
    role_id: Uuid,
) -> Result<Vec<Permission>, AppError> {
    require(state, ctx, permissions::ROLES_READ).await?;

    state
        .rbac
        .list_role_permissions(ctx, role_id)
        .await
        .map_err(app_error(ctx))
}
