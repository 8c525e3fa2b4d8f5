//! Organization administration. Every operation acts in the context's
//! organization and requires a permission there.

pub mod clients;
pub mod organizations;
pub mod roles;

use service_core::error::AppError;

use crate::context::RequestContext;
use crate::handlers::app_error;
use crate::AppState;

pub use clients::{disable_client, register_client, rotate_client_secret};
pub use organizations::{add_member, change_member_role, create_organization, remove_member};
pub use roles::{
    assign_permission, create_permission, create_role, delete_permission, delete_role,
    list_permissions, list_role_permissions, list_roles, revoke_permission, update_role,
};

pub(crate) async fn require(
    state: &AppState,
    ctx: &RequestContext,
    permission: &str,
) -> Result<(), AppError> {
    let user_id = ctx.require_user().map_err(app_error(ctx))?;
    let organization_id = ctx.require_organization().map_err(app_error(ctx))?;

    state
        .rbac
        .require_permission(ctx, user_id, organization_id, permission)
        .await
        .map_err(app_error(ctx))
}
