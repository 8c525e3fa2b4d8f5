use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::context::RequestContext;
use crate::dtos::admin::{AddMemberRequest, ChangeMemberRoleRequest, CreateOrganizationRequest};
use crate::handlers::admin::require;
use crate::handlers::app_error;
use crate::models::{Membership, Organization};
use crate::services::rbac::permissions;
use crate::AppState;

/// Any authenticated user may create an organization and becomes its owner.
pub async fn create_organization(
    state: &AppState,
    ctx: &RequestContext,
    req: CreateOrganizationRequest,
) -> Result<Organization, AppError> {
    req.validate()?;

    state
        .organizations
        .create_organization(ctx, &req.name, &req.slug)
        .await
        .map_err(app_error(ctx))
}

pub async fn add_member(
    state: &AppState,
    ctx: &RequestContext,
    req: AddMemberRequest,
) -> Result<Membership, AppError> {
    require(state, ctx, permissions::MEMBERS_MANAGE).await?;

    state
        .organizations
        .add_member(ctx, req.user_id, req.role_id)
        .await
        .map_err(app_error(ctx))
}

pub async fn change_member_role(
    state: &AppState,
    ctx: &RequestContext,
    user_id: Uuid,
    req: ChangeMemberRoleRequest,
) -> Result<Membership, AppError> {
    require(state, ctx, permissions::MEMBERS_MANAGE).await?;

    state
        .organizations
        .change_member_role(ctx, user_id, req.role_id)
        .await
        .map_err(app_error(ctx))
}

pub async fn remove_member(
    state: &AppState,
    ctx: &RequestContext,
    user_id: Uuid,
) -> Result<(), AppError> {
    require(state, ctx, permissions::MEMBERS_MANAGE).await?;

    state
        .organizations
        .remove_member(ctx, user_id)
        .await
        .map_err(app_error(ctx))
}
