use serde::Serialize;
use thiserror::Error;

/// Closed classification of every failure surfaced to a caller.
///
/// The transport layer maps kinds to its own status vocabulary; nothing in
/// this crate knows about HTTP or gRPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Token,
    OAuth,
    Permission,
    Validation,
    RateLimit,
    NotFound,
    Conflict,
    System,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Always the same message, whatever the underlying reason.
    #[error("Invalid credentials")]
    AuthError,

    #[error("Token error: {message}")]
    TokenError { code: &'static str, message: String },

    /// Token-endpoint error with a standard OAuth2 error identifier.
    #[error("{error}: {description}")]
    OAuthError {
        error: &'static str,
        description: String,
    },

    #[error("Forbidden: {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error (correlation id {correlation_id})")]
    InternalError {
        correlation_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl AppError {
    /// Wrap an unexpected failure. The full detail is logged here and never
    /// leaves the process; callers only see the correlation id.
    pub fn internal(source: anyhow::Error, correlation_id: &str) -> Self {
        tracing::error!(
            correlation_id = %correlation_id,
            error = ?source,
            "Internal failure"
        );
        AppError::InternalError {
            correlation_id: correlation_id.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => ErrorKind::Validation,
            AppError::AuthError => ErrorKind::Authentication,
            AppError::TokenError { .. } => ErrorKind::Token,
            AppError::OAuthError { .. } => ErrorKind::OAuth,
            AppError::Forbidden { .. } => ErrorKind::Permission,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::TooManyRequests(..) => ErrorKind::RateLimit,
            AppError::InternalError { .. } | AppError::ConfigError(_) => ErrorKind::System,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => "validation_error",
            AppError::AuthError => "invalid_credentials",
            AppError::TokenError { code, .. } => *code,
            AppError::OAuthError { error, .. } => *error,
            AppError::Forbidden { code, .. } => *code,
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::TooManyRequests(..) => "rate_limited",
            AppError::InternalError { .. } | AppError::ConfigError(_) => "internal_error",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AppError::TooManyRequests(_, retry) => *retry,
            _ => None,
        }
    }

    /// Body a transport layer can serialize as-is.
    pub fn to_body(&self) -> ErrorBody {
        let (description, details) = match self {
            AppError::ValidationError(err) => {
                ("Validation error".to_string(), Some(err.to_string()))
            }
            AppError::BadRequest(msg) => ("Validation error".to_string(), Some(msg.clone())),
            AppError::AuthError => ("Invalid credentials".to_string(), None),
            AppError::TokenError { message, .. } => (message.clone(), None),
            AppError::OAuthError { description, .. } => (description.clone(), None),
            AppError::Forbidden { message, .. } => (message.clone(), None),
            AppError::NotFound(msg) => (msg.clone(), None),
            AppError::Conflict(msg) => (msg.clone(), None),
            AppError::TooManyRequests(msg, _) => (msg.clone(), None),
            AppError::InternalError { .. } | AppError::ConfigError(_) => {
                ("Internal server error".to_string(), None)
            }
        };

        let correlation_id = match self {
            AppError::InternalError { correlation_id, .. } => Some(correlation_id.clone()),
            _ => None,
        };

        ErrorBody {
            error: self.code(),
            error_description: description,
            details,
            retry_after: self.retry_after(),
            correlation_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub error_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}
