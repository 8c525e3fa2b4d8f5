use chrono::{Duration, Utc};
use serde::Serialize;
use service_core::utils::random_token;
use std::collections::HashSet;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::models::{ClientApplication, ClientType};
use crate::services::error::ServiceError;
use crate::services::oauth2::is_standard_scope;
use crate::services::password::PasswordHasher;
use crate::services::rbac::RbacEngine;
use crate::store::CredentialStore;
use crate::utils::validation::validate_redirect_uri;

/// Registration input for a client application.
#[derive(Debug, Clone)]
pub struct NewClient {
    /// Generated when absent.
    pub client_id: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub confidential: bool,
}

/// The only time a plaintext secret leaves the service.
#[derive(Debug, Serialize)]
pub struct RegisteredClient {
    pub client: ClientApplication,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RotatedSecret {
    pub client_id: String,
    pub client_secret: String,
    /// Until when the previous secret is still accepted.
    pub previous_secret_expires_at: chrono::DateTime<Utc>,
}

pub struct ClientService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<PasswordHasher>,
    rbac: Arc<RbacEngine>,
    secret_grace_hours: i64,
}

impl ClientService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<PasswordHasher>,
        rbac: Arc<RbacEngine>,
        secret_grace_hours: i64,
    ) -> Self {
        Self {
            store,
            hasher,
            rbac,
            secret_grace_hours,
        }
    }

    pub async fn register_client(
        &self,
        ctx: &RequestContext,
        request: NewClient,
    ) -> Result<RegisteredClient, ServiceError> {
        let organization_id = ctx.require_organization()?;

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::Validation("client name is required".to_string()));
        }
        if request.redirect_uris.is_empty() {
            return Err(ServiceError::Validation(
                "at least one redirect URI is required".to_string(),
            ));
        }
        for uri in &request.redirect_uris {
            validate_redirect_uri(uri).map_err(ServiceError::Validation)?;
        }
        self.validate_scopes(ctx, &request.allowed_scopes).await?;

        let (client_type, client_secret, secret_hash) = if request.confidential {
            let secret = random_token(32);
            let hash = self.hasher.hash_secret(&secret).await?;
            (ClientType::Confidential, Some(secret), Some(hash))
        } else {
            (ClientType::Public, None, None)
        };

        let client_id = request
            .client_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| random_token(16));

        let client = ctx
            .run(self.store.create_client(ClientApplication::new(
                client_id,
                organization_id,
                name,
                client_type,
                secret_hash,
                request.redirect_uris,
                request.allowed_scopes,
            )))
            .await?;

        tracing::info!(
            client_id = %client.client_id,
            organization_id = %organization_id,
            client_type = %client_type,
            "Client application registered"
        );
        Ok(RegisteredClient {
            client,
            client_secret,
        })
    }

    /// Issue a new secret. The old one keeps working for the grace window.
    pub async fn rotate_client_secret(
        &self,
        ctx: &RequestContext,
        client_id: &str,
    ) -> Result<RotatedSecret, ServiceError> {
        let client = self.tenant_client(ctx, client_id).await?;
        if !client.is_confidential() {
            return Err(ServiceError::Validation(
                "public clients have no secret to rotate".to_string(),
            ));
        }

        let secret = random_token(32);
        let hash = self.hasher.hash_secret(&secret).await?;
        let grace_until = Utc::now() + Duration::hours(self.secret_grace_hours);

        ctx.run(self.store.update_client_secret(
            &client.client_id,
            &hash,
            client.client_secret_hash.as_deref(),
            Some(grace_until),
        ))
        .await?;

        tracing::info!(client_id = %client.client_id, "Client secret rotated");
        Ok(RotatedSecret {
            client_id: client.client_id,
            client_secret: secret,
            previous_secret_expires_at: grace_until,
        })
    }

    /// Disabled clients fail client authentication and lose their refresh
    /// tokens.
    pub async fn disable_client(&self, ctx: &RequestContext, client_id: &str) -> Result<(), ServiceError> {
        let client = self.tenant_client(ctx, client_id).await?;

        ctx.run(self.store.set_client_enabled(&client.client_id, false))
            .await?;
        let revoked = ctx
            .run(self.store.revoke_client_refresh_tokens(&client.client_id, Utc::now()))
            .await?;

        tracing::info!(
            client_id = %client.client_id,
            refresh_tokens_revoked = revoked,
            "Client application disabled"
        );
        Ok(())
    }

    pub async fn get_client(
        &self,
        ctx: &RequestContext,
        client_id: &str,
    ) -> Result<ClientApplication, ServiceError> {
        self.tenant_client(ctx, client_id).await
    }

    async fn tenant_client(
        &self,
        ctx: &RequestContext,
        client_id: &str,
    ) -> Result<ClientApplication, ServiceError> {
        let organization_id = ctx.require_organization()?;
        let client = ctx
            .run(self.store.get_client(client_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("client".to_string()))?;

        if client.organization_id != organization_id {
            return Err(ServiceError::ForeignTenant);
        }
        Ok(client)
    }

    /// Each scope is a standard one or a permission the organization can see.
    async fn validate_scopes(&self, ctx: &RequestContext, scopes: &[String]) -> Result<(), ServiceError> {
        if scopes.is_empty() {
            return Err(ServiceError::Validation(
                "at least one allowed scope is required".to_string(),
            ));
        }
        if scopes.iter().all(|s| is_standard_scope(s)) {
            return Ok(());
        }

        let visible: HashSet<String> = self
            .rbac
            .list_permissions(ctx)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();

        match scopes
            .iter()
            .find(|s| !is_standard_scope(s) && !visible.contains(s.as_str()))
        {
            Some(unknown) => Err(ServiceError::Validation(format!("unknown scope: {}", unknown))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordConfig;
    use crate::models::RefreshToken;
    use crate::store::memory::InMemoryCredentialStore;
    use service_core::utils::sha256_hex;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<InMemoryCredentialStore>,
        hasher: Arc<PasswordHasher>,
        rbac: Arc<RbacEngine>,
        clients: ClientService,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCredentialStore::new());
        let hasher = Arc::new(
            PasswordHasher::new(&PasswordConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
                ..PasswordConfig::default()
            })
            .unwrap(),
        );
        let rbac = Arc::new(RbacEngine::new(store.clone()));
        rbac.ensure_system_catalog(&ctx()).await.unwrap();
        let clients = ClientService::new(store.clone(), hasher.clone(), rbac.clone(), 24);
        Fixture {
            store,
            hasher,
            rbac,
            clients,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(StdDuration::from_secs(5))
    }

    fn new_client(scopes: &[&str], confidential: bool) -> NewClient {
        NewClient {
            client_id: None,
            name: "Dashboard".to_string(),
            redirect_uris: vec!["https://app.example.com/callback".to_string()],
            allowed_scopes: scopes.iter().map(|s| s.to_string()).collect(),
            confidential,
        }
    }

    #[tokio::test]
    async fn test_confidential_secret_returned_once_and_stored_hashed() {
        let f = fixture().await;
        let org_ctx = ctx().with_organization(Uuid::new_v4());

        let registered = f
            .clients
            .register_client(&org_ctx, new_client(&["openid", "profile"], true))
            .await
            .unwrap();

        let secret = registered.client_secret.unwrap();
        let stored = f
            .store
            .get_client(&registered.client.client_id)
            .await
            .unwrap()
            .unwrap();
        let hash = stored.client_secret_hash.unwrap();
        assert_ne!(hash, secret);
        assert!(f.hasher.verify(&secret, &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_public_client_has_no_secret() {
        let f = fixture().await;
        let org_ctx = ctx().with_organization(Uuid::new_v4());

        let registered = f
            .clients
            .register_client(&org_ctx, new_client(&["profile"], false))
            .await
            .unwrap();
        assert!(registered.client_secret.is_none());
        assert!(!registered.client.is_confidential());

        let err = f
            .clients
            .rotate_client_secret(&org_ctx, &registered.client.client_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_fragment_redirect_and_unknown_scope() {
        let f = fixture().await;
        let org_ctx = ctx().with_organization(Uuid::new_v4());

        let mut bad_uri = new_client(&["profile"], false);
        bad_uri.redirect_uris = vec!["https://app.example.com/cb#frag".to_string()];
        assert!(matches!(
            f.clients.register_client(&org_ctx, bad_uri).await.unwrap_err(),
            ServiceError::Validation(_)
        ));

        assert!(matches!(
            f.clients
                .register_client(&org_ctx, new_client(&["reports:export"], false))
                .await
                .unwrap_err(),
            ServiceError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_scope_may_name_org_permission() {
        let f = fixture().await;
        let org_a = ctx().with_organization(Uuid::new_v4());
        let org_b = ctx().with_organization(Uuid::new_v4());
        f.rbac
            .create_custom_permission(&org_a, "reports:export", "reports")
            .await
            .unwrap();

        f.clients
            .register_client(&org_a, new_client(&["openid", "reports:export"], false))
            .await
            .unwrap();
        f.clients
            .register_client(&org_b, new_client(&["members:read"], false))
            .await
            .unwrap();
        assert!(f
            .clients
            .register_client(&org_b, new_client(&["reports:export"], false))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rotation_keeps_previous_secret_in_grace() {
        let f = fixture().await;
        let org_ctx = ctx().with_organization(Uuid::new_v4());
        let registered = f
            .clients
            .register_client(&org_ctx, new_client(&["profile"], true))
            .await
            .unwrap();
        let old_secret = registered.client_secret.unwrap();

        let rotated = f
            .clients
            .rotate_client_secret(&org_ctx, &registered.client.client_id)
            .await
            .unwrap();
        assert_ne!(rotated.client_secret, old_secret);

        let stored = f
            .clients
            .get_client(&org_ctx, &registered.client.client_id)
            .await
            .unwrap();
        let previous = stored.previous_secret_in_grace(Utc::now()).unwrap();
        assert!(f.hasher.verify(&old_secret, previous).await.unwrap());
        assert!(stored
            .previous_secret_in_grace(Utc::now() + Duration::hours(25))
            .is_none());
    }

    #[tokio::test]
    async fn test_other_org_cannot_manage_client() {
        let f = fixture().await;
        let owner_ctx = ctx().with_organization(Uuid::new_v4());
        let registered = f
            .clients
            .register_client(&owner_ctx, new_client(&["profile"], true))
            .await
            .unwrap();

        let other = ctx().with_organization(Uuid::new_v4());
        assert!(matches!(
            f.clients
                .disable_client(&other, &registered.client.client_id)
                .await
                .unwrap_err(),
            ServiceError::ForeignTenant
        ));
        assert!(matches!(
            f.clients.disable_client(&other, "missing").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_disable_revokes_refresh_tokens() {
        let f = fixture().await;
        let org_id = Uuid::new_v4();
        let org_ctx = ctx().with_organization(org_id);
        let registered = f
            .clients
            .register_client(&org_ctx, new_client(&["profile"], false))
            .await
            .unwrap();
        let client_id = registered.client.client_id.clone();

        let token_hash = sha256_hex("bearer");
        f.store
            .insert_refresh_token(RefreshToken::new(
                token_hash.clone(),
                Uuid::new_v4(),
                Some(client_id.clone()),
                org_id,
                "profile".to_string(),
                30,
            ))
            .await
            .unwrap();

        f.clients.disable_client(&org_ctx, &client_id).await.unwrap();

        let stored = f.store.get_client(&client_id).await.unwrap().unwrap();
        assert!(!stored.enabled);
        let token = f.store.find_refresh_token(&token_hash).await.unwrap().unwrap();
        assert!(token.is_revoked());
    }
}
