use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::EmailVerification => "email_verification",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

/// One-time token for email verification or password reset. Stored hashed.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationToken {
    pub id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn new_email_verification(user_id: Uuid, token_hash: String) -> Self {
        Self::new(user_id, token_hash, TokenPurpose::EmailVerification, Duration::hours(24))
    }

    pub fn new_password_reset(user_id: Uuid, token_hash: String) -> Self {
        Self::new(user_id, token_hash, TokenPurpose::PasswordReset, Duration::hours(1))
    }

    fn new(user_id: Uuid, token_hash: String, purpose: TokenPurpose, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            token_hash,
            user_id,
            purpose: purpose.as_str().to_string(),
            expires_at: now + ttl,
            consumed_at: None,
            created_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_for(&self, purpose: TokenPurpose) -> bool {
        self.purpose == purpose.as_str()
    }
}
