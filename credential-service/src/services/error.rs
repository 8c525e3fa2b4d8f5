use crate::store::StoreError;
use service_core::error::{AppError, ErrorKind};
use thiserror::Error;
use uuid::Uuid;

/// Token-endpoint errors. `error_code` is the standard OAuth2 identifier,
/// `Display` is the human description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("client authentication failed")]
    InvalidClient,

    #[error("{0}")]
    InvalidGrant(String),

    #[error("{0}")]
    InvalidScope(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("grant type {0} is not supported")]
    UnsupportedGrantType(String),

    #[error("refresh token reuse detected; token family revoked")]
    RefreshTokenReuseDetected,
}

impl OAuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::RefreshTokenReuseDetected => "refresh_token_reuse_detected",
        }
    }

    pub(crate) fn grant(description: &str) -> Self {
        OAuthError::InvalidGrant(description.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Wrong password, unknown account, locked, suspended or unverified.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token revoked")]
    TokenRevoked,

    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error("missing permission {0}")]
    PermissionDenied(String),

    #[error(
        "cannot assign custom permission from organization {} to role in organization {}",
        .permission_org,
        org_label(.role_org)
    )]
    CrossTenantAssignment {
        permission_org: Uuid,
        role_org: Option<Uuid>,
    },

    /// The entity exists but belongs to another organization. Carries no
    /// detail about the other tenant.
    #[error("resource belongs to another organization")]
    ForeignTenant,

    #[error("{0} is a system entity and cannot be modified")]
    SystemEntityImmutable(String),

    #[error("role {0} still has active memberships")]
    RoleInUse(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("Too many requests")]
    RateLimited { retry_after: u64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Store call exceeded the request deadline")]
    DeadlineExceeded,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn org_label(org: &Option<Uuid>) -> String {
    org.map(|id| id.to_string())
        .unwrap_or_else(|| "system".to_string())
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Conflict(what) => ServiceError::Conflict(what),
            StoreError::FamilyRevoked(_) => {
                OAuthError::grant("refresh token family has been revoked").into()
            }
            StoreError::Unexpected(e) => ServiceError::Internal(e),
        }
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidCredentials | ServiceError::Unauthenticated => {
                ErrorKind::Authentication
            }
            ServiceError::TokenExpired | ServiceError::TokenInvalid | ServiceError::TokenRevoked => {
                ErrorKind::Token
            }
            ServiceError::OAuth(_) => ErrorKind::OAuth,
            ServiceError::PermissionDenied(_)
            | ServiceError::CrossTenantAssignment { .. }
            | ServiceError::ForeignTenant
            | ServiceError::SystemEntityImmutable(_) => ErrorKind::Permission,
            ServiceError::Validation(_) | ServiceError::InvalidInput(_) => ErrorKind::Validation,
            ServiceError::RateLimited { .. } => ErrorKind::RateLimit,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Conflict(_) | ServiceError::RoleInUse(_) => ErrorKind::Conflict,
            ServiceError::DeadlineExceeded | ServiceError::Internal(_) => ErrorKind::System,
        }
    }

    /// Boundary conversion. System failures are logged under
    /// `correlation_id` and lose their detail.
    pub fn into_app_error(self, correlation_id: &str) -> AppError {
        match self {
            ServiceError::InvalidCredentials | ServiceError::Unauthenticated => AppError::AuthError,
            ServiceError::TokenExpired => AppError::TokenError {
                code: "token_expired",
                message: "Token expired".to_string(),
            },
            ServiceError::TokenInvalid => AppError::TokenError {
                code: "token_invalid",
                message: "Invalid token".to_string(),
            },
            ServiceError::TokenRevoked => AppError::TokenError {
                code: "token_revoked",
                message: "Token revoked".to_string(),
            },
            ServiceError::OAuth(e) => AppError::OAuthError {
                error: e.error_code(),
                description: e.to_string(),
            },
            e @ ServiceError::PermissionDenied(_)
            | e @ ServiceError::ForeignTenant
            | e @ ServiceError::SystemEntityImmutable(_) => {
                AppError::Forbidden {
                    code: "permission_denied",
                    message: e.to_string(),
                }
            }
            e @ ServiceError::CrossTenantAssignment { .. } => AppError::Forbidden {
                code: "cross_tenant_assignment",
                message: e.to_string(),
            },
            ServiceError::Validation(msg) => AppError::BadRequest(msg),
            ServiceError::InvalidInput(errors) => AppError::ValidationError(errors),
            ServiceError::RateLimited { retry_after } => {
                AppError::TooManyRequests("Too many requests".to_string(), Some(retry_after))
            }
            ServiceError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            e @ ServiceError::Conflict(_) | e @ ServiceError::RoleInUse(_) => {
                AppError::Conflict(e.to_string())
            }
            ServiceError::DeadlineExceeded => AppError::internal(
                anyhow::anyhow!("store call exceeded the request deadline"),
                correlation_id,
            ),
            ServiceError::Internal(e) => AppError::internal(e, correlation_id),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        err.into_app_error(&Uuid::new_v4().to_string())
    }
}
