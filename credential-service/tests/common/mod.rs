//! Shared setup for credential-service integration tests.
//!
//! Everything runs against the in-memory credential store and key-value
//! cache, with a mock email provider that records outgoing messages.

#![allow(dead_code)]

use credential_service::{
    config::{
        CredentialConfig, DatabaseConfig, Environment, LockoutConfig, OAuthConfig,
        PasswordConfig, RateLimitConfig, RateLimitRule, RedisConfig, SmtpConfig, TokenConfig,
    },
    context::RequestContext,
    dtos::auth::LoginRequest,
    handlers,
    models::ClientApplication,
    services::{
        AccessTokenClaims, MemoryKeyValueStore, MockEmailService, NewClient, SentEmail,
        TokenPair,
    },
    store::{memory::InMemoryCredentialStore, CredentialStore},
    utils::{pkce, Password},
    AppState,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use uuid::Uuid;

const PRIVATE_KEY: &str = include_str!("../fixtures/signing_key.pem");
const PUBLIC_KEY: &str = include_str!("../fixtures/signing_key.pub.pem");

pub const PASSWORD: &str = "Correct-Horse-42";
pub const REDIRECT_URI: &str = "http://localhost/callback";

fn generous(attempts: u32) -> RateLimitRule {
    RateLimitRule {
        attempts,
        window_seconds: 900,
    }
}

pub fn test_config(private_key_path: &str, public_key_path: &str) -> CredentialConfig {
    CredentialConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "credential-service-test".to_string(),
        database: DatabaseConfig {
            url: "postgres://localhost/credential_test".to_string(),
            max_connections: 2,
            min_connections: 1,
            acquire_timeout_secs: 5,
        },
        redis: RedisConfig {
            url: "redis://localhost:6379".to_string(),
        },
        token: TokenConfig {
            private_key_path: private_key_path.to_string(),
            public_key_path: public_key_path.to_string(),
            issuer: "credential-service".to_string(),
            audience: "credential-service".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 30,
            leeway_seconds: 0,
        },
        oauth: OAuthConfig::default(),
        // cheap argon2 so tests stay fast
        password: PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
            ..PasswordConfig::default()
        },
        rate_limit: RateLimitConfig {
            login_per_ip: generous(1000),
            login_per_email: generous(1000),
            register_per_ip: generous(1000),
            password_reset_per_ip: generous(1000),
            password_reset_per_email: generous(1000),
        },
        lockout: LockoutConfig::default(),
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            from_address: "no-reply@example.com".to_string(),
            base_url: "http://localhost:3000".to_string(),
        },
    }
}

fn write_key(pem: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create key file");
    file.write_all(pem.as_bytes())
        .expect("Failed to write key file");
    file
}

/// A fully wired application over in-memory backends.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<InMemoryCredentialStore>,
    pub email: Arc<MockEmailService>,
    _key_files: (NamedTempFile, NamedTempFile),
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(customize: impl FnOnce(&mut CredentialConfig)) -> Self {
        Self::build(customize, MockEmailService::new()).await
    }

    /// Every outgoing email fails.
    pub async fn spawn_with_failing_email() -> Self {
        Self::build(|_| {}, MockEmailService::failing()).await
    }

    async fn build(
        customize: impl FnOnce(&mut CredentialConfig),
        email: MockEmailService,
    ) -> Self {
        let private_file = write_key(PRIVATE_KEY);
        let public_file = write_key(PUBLIC_KEY);
        let mut config = test_config(
            private_file.path().to_str().unwrap(),
            public_file.path().to_str().unwrap(),
        );
        customize(&mut config);

        let store = Arc::new(InMemoryCredentialStore::new());
        let email = Arc::new(email);
        let state = AppState::from_parts(
            &config,
            store.clone(),
            Arc::new(MemoryKeyValueStore::new()),
            email.clone(),
        )
        .expect("Failed to build app state");
        state.bootstrap().await.expect("Failed to seed catalog");

        Self {
            state,
            store,
            email,
            _key_files: (private_file, public_file),
        }
    }

    pub fn ctx(&self) -> RequestContext {
        self.state.new_context()
    }

    /// Registered and email-verified.
    pub async fn create_user(&self, email: &str) -> Uuid {
        let user = self
            .state
            .auth
            .register(&self.ctx(), email, &Password::new(PASSWORD.to_string()), None)
            .await
            .expect("Failed to register user");
        self.store
            .set_email_verified(user.user_id)
            .await
            .expect("Failed to verify user");
        user.user_id
    }

    pub async fn create_org(&self, owner: Uuid, slug: &str) -> Uuid {
        self.state
            .organizations
            .create_organization(&self.ctx().with_user(owner), slug, slug)
            .await
            .expect("Failed to create organization")
            .organization_id
    }

    /// Add `user_id` to the organization with a system role.
    pub async fn add_member(&self, organization_id: Uuid, user_id: Uuid, role: &str) {
        let role = self
            .state
            .rbac
            .system_role(&self.ctx(), role)
            .await
            .expect("Missing system role");
        self.state
            .organizations
            .add_member(
                &self.ctx().with_organization(organization_id),
                user_id,
                role.role_id,
            )
            .await
            .expect("Failed to add member");
    }

    /// Returns the client and its plaintext secret (confidential only).
    pub async fn register_client(
        &self,
        organization_id: Uuid,
        client_id: &str,
        scopes: &[&str],
        confidential: bool,
    ) -> (ClientApplication, Option<String>) {
        let registered = self
            .state
            .clients
            .register_client(
                &self.ctx().with_organization(organization_id),
                NewClient {
                    client_id: Some(client_id.to_string()),
                    name: format!("{} app", client_id),
                    redirect_uris: vec![REDIRECT_URI.to_string()],
                    allowed_scopes: scopes.iter().map(|s| s.to_string()).collect(),
                    confidential,
                },
            )
            .await
            .expect("Failed to register client");
        (registered.client, registered.client_secret)
    }

    pub async fn login(&self, email: &str, organization_id: Uuid) -> TokenPair {
        handlers::authenticate(
            &self.state,
            &self.ctx(),
            LoginRequest {
                email: email.to_string(),
                password: Password::new(PASSWORD.to_string()),
                organization_id,
            },
        )
        .await
        .expect("Login failed")
    }

    /// Context bound to the principal of `access_token`.
    pub async fn bearer(&self, access_token: &str) -> (RequestContext, AccessTokenClaims) {
        handlers::authenticate_bearer(&self.state, self.ctx(), access_token)
            .await
            .expect("Bearer token rejected")
    }

    /// Emails are sent from a spawned task; poll until one matches.
    pub async fn wait_for_email(&self, matches: impl Fn(&SentEmail) -> bool) -> SentEmail {
        for _ in 0..200 {
            if let Some(found) = self.email.sent().into_iter().find(|e| matches(e)) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected email was never sent");
    }
}

/// A user who owns an organization with a public client registered for
/// `client_id`.
pub struct OAuthFixture {
    pub app: TestApp,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub client_id: String,
}

impl OAuthFixture {
    pub async fn new(client_id: &str, scopes: &[&str]) -> Self {
        let app = TestApp::spawn().await;
        let user_id = app.create_user("owner@example.com").await;
        let organization_id = app.create_org(user_id, "acme").await;
        app.register_client(organization_id, client_id, scopes, false)
            .await;
        Self {
            app,
            user_id,
            organization_id,
            client_id: client_id.to_string(),
        }
    }

    pub fn user_ctx(&self) -> RequestContext {
        self.app.ctx().with_user(self.user_id)
    }
}

pub fn pkce_pair() -> (String, String) {
    pkce::generate_pair()
}
