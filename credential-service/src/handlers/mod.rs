//! Boundary facade over [`AppState`](crate::AppState).
//!
//! Transport-agnostic: every operation takes an explicit
//! [`RequestContext`](crate::context::RequestContext) and returns
//! [`AppError`], which carries the stable error code a transport maps to its
//! own status vocabulary.

pub mod access;
pub mod admin;
pub mod auth;
pub mod oauth;
pub mod revocation;
pub mod well_known;

use service_core::error::AppError;

use crate::context::RequestContext;
use crate::services::ServiceError;

pub use access::{check_access, effective_permissions};
pub use auth::{
    authenticate, authenticate_bearer, change_password, confirm_password_reset, introspect,
    logout, register, request_password_reset, verify_email,
};
pub use oauth::{authorize, exchange_token, refresh};
pub use revocation::{revoke_org_sessions, revoke_token, revoke_user_in_org, revoke_user_sessions};
pub use well_known::jwks;

/// Convert under the request's correlation id so system failures can be
/// traced back to their log line.
pub(crate) fn app_error(ctx: &RequestContext) -> impl FnOnce(ServiceError) -> AppError + '_ {
    move |e| e.into_app_error(&ctx.correlation_id)
}

/// The acting organization, or a validation error.
pub(crate) fn acting_org(ctx: &RequestContext) -> Result<uuid::Uuid, AppError> {
    ctx.require_organization().map_err(app_error(ctx))
}
