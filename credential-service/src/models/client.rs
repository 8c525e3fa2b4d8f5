use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Can keep a secret (server-side apps).
    Confidential,
    /// Cannot keep a secret (SPAs, native apps). Always relies on PKCE.
    Public,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Confidential => "confidential",
            ClientType::Public => "public",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered OAuth2 client application, owned by one organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientApplication {
    /// Internal key.
    pub id: Uuid,
    /// Public identifier presented by the client.
    pub client_id: String,
    pub organization_id: Uuid,
    pub name: String,
    pub client_type: String,
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    #[serde(skip_serializing)]
    pub previous_client_secret_hash: Option<String>,
    pub previous_secret_expiry: Option<DateTime<Utc>>,
    /// Exact-match set.
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientApplication {
    pub fn new(
        client_id: String,
        organization_id: Uuid,
        name: String,
        client_type: ClientType,
        client_secret_hash: Option<String>,
        redirect_uris: Vec<String>,
        allowed_scopes: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id,
            organization_id,
            name,
            client_type: client_type.as_str().to_string(),
            client_secret_hash,
            previous_client_secret_hash: None,
            previous_secret_expiry: None,
            redirect_uris,
            allowed_scopes,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential.as_str()
    }

    /// Byte-for-byte comparison; no prefix or wildcard matching.
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_scopes.iter().any(|s| s == scope)
    }

    /// Previous secret hash, if still inside its grace window.
    pub fn previous_secret_in_grace(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.previous_client_secret_hash, self.previous_secret_expiry) {
            (Some(hash), Some(expiry)) if expiry > now => Some(hash.as_str()),
            _ => None,
        }
    }
}
