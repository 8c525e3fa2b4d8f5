use service_core::error::AppError;
use service_core::utils::sha256_hex;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::handlers::{acting_org, app_error};
use crate::services::rbac::permissions;
use crate::services::ServiceError;
use crate::AppState;

/// RFC 7009-style revocation of one access or refresh token. Tokens the
/// caller does not own need `sessions:revoke` in the token's organization.
/// Unknown and already-expired tokens succeed without effect.
pub async fn revoke_token(
    state: &AppState,
    ctx: &RequestContext,
    token: &str,
) -> Result<(), AppError> {
    let caller = ctx.require_user().map_err(app_error(ctx))?;

    match state.tokens.decode(token) {
        Ok(claims) => {
            let owner = claims.user_id().map_err(app_error(ctx))?;
            let organization_id = claims.organization_id().map_err(app_error(ctx))?;
            if owner != caller {
                require_revoke_permission(state, ctx, caller, organization_id).await?;
            }
            state
                .tokens
                .revocation()
                .revoke_token(ctx, &claims.jti, claims.exp)
                .await
                .map_err(app_error(ctx))?;
            return Ok(());
        }
        Err(ServiceError::TokenExpired) => return Ok(()),
        Err(_) => {}
    }

    let record = ctx
        .run(state.store.find_refresh_token(&sha256_hex(token)))
        .await
        .map_err(app_error(ctx))?;
    let Some(record) = record else {
        return Ok(());
    };
    if record.user_id != caller {
        require_revoke_permission(state, ctx, caller, record.organization_id).await?;
    }

    let revoked = ctx
        .run(state.store.revoke_refresh_family(record.family_id, chrono::Utc::now()))
        .await
        .map_err(app_error(ctx))?;
    tracing::info!(
        user_id = %record.user_id,
        family_id = %record.family_id,
        revoked = revoked,
        "Refresh token family revoked"
    );
    Ok(())
}

/// Revoke every session of `user_id` in every organization. Only the user
/// themself or a superadmin may do this; organization admins use
/// [`revoke_user_in_org`].
pub async fn revoke_user_sessions(
    state: &AppState,
    ctx: &RequestContext,
    user_id: Uuid,
) -> Result<u64, AppError> {
    let caller = ctx.require_user().map_err(app_error(ctx))?;

    if caller != user_id {
        let is_superadmin = ctx
            .run(state.store.get_user(caller))
            .await
            .map_err(app_error(ctx))?
            .is_some_and(|u| u.is_superadmin && u.is_active());
        if !is_superadmin {
            tracing::warn!(
                caller = %caller,
                target = %user_id,
                correlation_id = %ctx.correlation_id,
                "Global session revocation refused"
            );
            return Err(app_error(ctx)(ServiceError::PermissionDenied(
                permissions::SESSIONS_REVOKE.to_string(),
            )));
        }
    }

    state
        .tokens
        .revocation()
        .revoke_user_sessions(ctx, user_id)
        .await
        .map_err(app_error(ctx))
}

/// Revoke every session issued for the acting organization.
pub async fn revoke_org_sessions(state: &AppState, ctx: &RequestContext) -> Result<u64, AppError> {
    let caller = ctx.require_user().map_err(app_error(ctx))?;
    let organization_id = acting_org(ctx)?;
    require_revoke_permission(state, ctx, caller, organization_id).await?;

    state
        .tokens
        .revocation()
        .revoke_org_sessions(ctx, organization_id)
        .await
        .map_err(app_error(ctx))
}

/// Revoke `user_id`'s sessions in the acting organization only.
pub async fn revoke_user_in_org(
    state: &AppState,
    ctx: &RequestContext,
    user_id: Uuid,
) -> Result<u64, AppError> {
    let caller = ctx.require_user().map_err(app_error(ctx))?;
    let organization_id = acting_org(ctx)?;
    if caller != user_id {
        require_revoke_permission(state, ctx, caller, organization_id).await?;
    }

    state
        .tokens
        .revocation()
        .revoke_user_in_org(ctx, user_id, organization_id)
        .await
        .map_err(app_error(ctx))
}

async fn require_revoke_permission(
    state: &AppState,
    ctx: &RequestContext,
    caller: Uuid,
    organization_id: Uuid,
) -> Result<(), AppError> {
    state
        .rbac
        .require_permission(ctx, caller, organization_id, permissions::SESSIONS_REVOKE)
        .await
        .map_err(app_error(ctx))
}
