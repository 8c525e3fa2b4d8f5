use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted refresh token. The raw value is returned to the caller once;
/// only its SHA-256 hash is stored.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,

    #[serde(skip_serializing)]
    pub token_hash: String,

    pub user_id: Uuid,

    /// `None` for first-party sessions created by password authentication.
    pub client_id: Option<String>,

    pub organization_id: Uuid,

    /// Rotation lineage. Every token derived from one original grant shares it.
    pub family_id: Uuid,

    pub scope: String,

    pub expires_at: DateTime<Utc>,

    /// Set once. Presenting a token whose `revoked_at` is set is reuse.
    pub revoked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Create a new refresh token starting a fresh family.
    pub fn new(
        token_hash: String,
        user_id: Uuid,
        client_id: Option<String>,
        organization_id: Uuid,
        scope: String,
        expires_in_days: i64,
    ) -> Self {
        Self::in_family(
            Uuid::new_v4(),
            token_hash,
            user_id,
            client_id,
            organization_id,
            scope,
            expires_in_days,
        )
    }

    /// Create a rotated token in an existing family.
    pub fn in_family(
        family_id: Uuid,
        token_hash: String,
        user_id: Uuid,
        client_id: Option<String>,
        organization_id: Uuid,
        scope: String,
        expires_in_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            token_hash,
            user_id,
            client_id,
            organization_id,
            family_id,
            scope,
            expires_at: now + Duration::days(expires_in_days),
            revoked_at: None,
            created_at: now,
        }
    }

    /// Check if this token is expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Check if this token is valid (not expired and not revoked)
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && !self.is_revoked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> RefreshToken {
        RefreshToken::new(
            "hash".to_string(),
            Uuid::new_v4(),
            Some("abc123".to_string()),
            Uuid::new_v4(),
            "profile".to_string(),
            7,
        )
    }

    #[test]
    fn test_refresh_token_expiry() {
        let mut token = token();
        assert!(token.is_valid());

        token.expires_at = Utc::now() - Duration::seconds(1);
        assert!(token.is_expired());
        assert!(!token.is_valid());
    }

    #[test]
    fn test_refresh_token_revocation() {
        let mut token = token();
        token.revoked_at = Some(Utc::now());
        assert!(token.is_revoked());
        assert!(!token.is_valid());
    }

    #[test]
    fn test_rotation_keeps_family() {
        let first = token();
        let second = RefreshToken::in_family(
            first.family_id,
            "hash2".to_string(),
            first.user_id,
            first.client_id.clone(),
            first.organization_id,
            first.scope.clone(),
            7,
        );
        assert_eq!(first.family_id, second.family_id);
        assert_ne!(first.id, second.id);
    }
}
