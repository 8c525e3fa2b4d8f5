use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Short-lived, single-use grant produced by the authorize step.
///
/// Only the SHA-256 of the code is persisted.
#[derive(Debug, Clone, FromRow)]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub redirect_uri: String,
    /// Space-delimited granted scopes.
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code_hash: String,
        client_id: String,
        user_id: Uuid,
        organization_id: Uuid,
        redirect_uri: String,
        scope: String,
        code_challenge: String,
        code_challenge_method: String,
        expires_in_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            code_hash,
            client_id,
            user_id,
            organization_id,
            redirect_uri,
            scope,
            code_challenge,
            code_challenge_method,
            expires_at: now + Duration::minutes(expires_in_minutes),
            used: false,
            used_at: None,
            created_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_expiry() {
        let mut code = AuthorizationCode::new(
            "h".to_string(),
            "abc123".to_string(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "http://localhost/callback".to_string(),
            "profile".to_string(),
            "challenge".to_string(),
            "S256".to_string(),
            10,
        );
        assert!(!code.is_expired());
        assert!(!code.used);

        code.expires_at = Utc::now() - Duration::seconds(1);
        assert!(code.is_expired());
    }
}
