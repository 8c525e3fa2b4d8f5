pub mod config;
pub mod context;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use service_core::error::AppError;

use crate::config::CredentialConfig;
use crate::context::RequestContext;
use crate::services::{
    AuthService, ClientService, EmailProvider, EmailService, KeyValueStore, OAuth2Server,
    OrganizationService, PasswordHasher, RateLimiter, RbacEngine, RedisService, RevocationStore,
    TokenService,
};
use crate::store::postgres::PgCredentialStore;
use crate::store::CredentialStore;

/// Every component, wired once and shared by the boundary facade.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub cache: Arc<dyn KeyValueStore>,
    pub tokens: Arc<TokenService>,
    pub rbac: Arc<RbacEngine>,
    pub oauth: Arc<OAuth2Server>,
    pub auth: Arc<AuthService>,
    pub organizations: Arc<OrganizationService>,
    pub clients: Arc<ClientService>,
    request_timeout: Duration,
}

impl AppState {
    /// Connect PostgreSQL, Redis and SMTP, apply migrations and seed the
    /// system catalog.
    pub async fn connect(config: &CredentialConfig) -> Result<Self, AppError> {
        let pool = db::create_pool(&config.database)
            .await
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to connect to PostgreSQL: {}", e)))?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to apply migrations: {}", e)))?;

        let cache = RedisService::new(&config.redis)
            .await
            .map_err(AppError::ConfigError)?;
        let email = EmailService::new(&config.smtp).map_err(AppError::ConfigError)?;

        let state = Self::from_parts(
            config,
            Arc::new(PgCredentialStore::new(pool)),
            Arc::new(cache),
            Arc::new(email),
        )?;
        state.bootstrap().await?;
        Ok(state)
    }

    /// Wire the components over already-built backends. No I/O beyond
    /// reading the signing keys.
    pub fn from_parts(
        config: &CredentialConfig,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn KeyValueStore>,
        email: Arc<dyn EmailProvider>,
    ) -> Result<Self, AppError> {
        let hasher = Arc::new(
            PasswordHasher::new(&config.password)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}", e)))?,
        );
        let revocation = Arc::new(RevocationStore::new(
            cache.clone(),
            store.clone(),
            TokenService::max_token_lifetime_seconds(&config.token),
        ));
        let tokens = Arc::new(
            TokenService::new(&config.token, store.clone(), revocation.clone())
                .map_err(AppError::ConfigError)?,
        );
        let rbac = Arc::new(RbacEngine::new(store.clone()));
        let limiter = Arc::new(RateLimiter::new(cache.clone()));

        let oauth = Arc::new(OAuth2Server::new(
            store.clone(),
            tokens.clone(),
            rbac.clone(),
            hasher.clone(),
            config.oauth.clone(),
        ));
        let auth = Arc::new(AuthService::new(
            store.clone(),
            hasher.clone(),
            tokens.clone(),
            rbac.clone(),
            limiter,
            email,
            config.rate_limit.clone(),
            config.lockout.clone(),
        ));
        let organizations = Arc::new(OrganizationService::new(
            store.clone(),
            rbac.clone(),
            revocation,
        ));
        let clients = Arc::new(ClientService::new(
            store.clone(),
            hasher,
            rbac.clone(),
            config.oauth.client_secret_grace_hours,
        ));

        Ok(Self {
            store,
            cache,
            tokens,
            rbac,
            oauth,
            auth,
            organizations,
            clients,
            request_timeout: Duration::from_millis(config.common.store_timeout_ms),
        })
    }

    /// Idempotent. Seeds the system roles and permissions.
    pub async fn bootstrap(&self) -> Result<(), AppError> {
        let ctx = self.new_context();
        self.rbac
            .ensure_system_catalog(&ctx)
            .await
            .map_err(|e| e.into_app_error(&ctx.correlation_id))?;
        tracing::info!(backend = self.store.backend_name(), "System catalog ready");
        Ok(())
    }

    /// Anonymous context carrying the configured store deadline.
    pub fn new_context(&self) -> RequestContext {
        RequestContext::new(self.request_timeout)
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        let ctx = self.new_context();
        ctx.run(self.store.health_check())
            .await
            .map_err(|e| e.into_app_error(&ctx.correlation_id))?;
        self.cache.health_check().await.map_err(|e| {
            tracing::error!(error = %e, "Redis health check failed");
            AppError::internal(e, &ctx.correlation_id)
        })?;
        Ok(())
    }
}
