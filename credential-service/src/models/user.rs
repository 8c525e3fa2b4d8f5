//! User model - principals that authenticate against the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Deactivated,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Deactivated => "deactivated",
        }
    }
}

/// User entity. Never hard-deleted; deactivation is a status change.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    /// Trimmed, lower-cased.
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub status: String,
    pub email_verified: bool,
    /// Global bypass for every organization-scoped permission check.
    pub is_superadmin: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user. `email` must already be normalized.
    pub fn new(email: String, password_hash: String, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email,
            password_hash,
            display_name,
            status: UserStatus::Active.as_str().to_string(),
            email_verified: false,
            is_superadmin: false,
            failed_login_attempts: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if user is active.
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active.as_str()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser::from(self.clone())
    }
}

/// User view without credential material.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedUser {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub status: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for SanitizedUser {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email,
            display_name: u.display_name,
            status: u.status,
            email_verified: u.email_verified,
            created_at: u.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_user_defaults() {
        let user = User::new("a@example.com".to_string(), "hash".to_string(), None);
        assert!(user.is_active());
        assert!(!user.email_verified);
        assert!(!user.is_superadmin);
        assert_eq!(user.failed_login_attempts, 0);
        assert!(!user.is_locked(Utc::now()));
    }

    #[test]
    fn test_lock_window() {
        let mut user = User::new("a@example.com".to_string(), "hash".to_string(), None);
        let now = Utc::now();
        user.locked_until = Some(now + Duration::minutes(5));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + Duration::minutes(6)));
    }

    #[test]
    fn test_sanitized_user_drops_hash() {
        let user = User::new("a@example.com".to_string(), "secret-hash".to_string(), None);
        let json = serde_json::to_string(&user.sanitized()).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
