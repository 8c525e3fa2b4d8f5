use service_core::error::AppError;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::handlers::app_error;
use crate::AppState;

/// Whether `user_id` holds `permission` in `organization_id`. The RBAC engine
/// is the only place this is decided.
pub async fn check_access(
    state: &AppState,
    ctx: &RequestContext,
    user_id: Uuid,
    organization_id: Uuid,
    permission: &str,
) -> Result<bool, AppError> {
    state
        .rbac
        .check_permission(ctx, user_id, organization_id, permission)
        .await
        .map_err(app_error(ctx))
}

/// The caller's own permissions in the acting organization.
pub async fn effective_permissions(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<Vec<String>, AppError> {
    let user_id = ctx.require_user().map_err(app_error(ctx))?;
    let organization_id = ctx.require_organization().map_err(app_error(ctx))?;

    state
        .rbac
        .effective_permissions(ctx, user_id, organization_id)
        .await
        .map_err(app_error(ctx))
}
