//! Authorization-code + PKCE flow and refresh-token rotation for registered
//! client applications.
//!
//! A code moves `issued -> exchanged` exactly once through the store's
//! conditional update; a refresh token moves `live -> rotated` the same way.
//! Presenting a rotated refresh token again revokes its whole family.

use chrono::Utc;
use service_core::utils::{random_token, sha256_hex};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::OAuthConfig;
use crate::context::RequestContext;
use crate::models::{AuthorizationCode, ClientApplication};
use crate::services::error::{OAuthError, ServiceError};
use crate::services::jwt::{AccessGrant, TokenPair, TokenService};
use crate::services::password::PasswordHasher;
use crate::services::rbac::RbacEngine;
use crate::store::CredentialStore;
use crate::utils::pkce::{self, CodeChallengeMethod};
use crate::utils::validation::{join_scope, parse_scope};

/// Scopes about the user's own identity. Any client allowed to request them
/// may be granted them without an RBAC permission.
pub const STANDARD_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];

pub fn is_standard_scope(scope: &str) -> bool {
    STANDARD_SCOPES.contains(&scope)
}

pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub code: String,
    pub redirect_uri: String,
    pub scope: String,
    pub expires_in: i64,
}

pub struct ExchangeRequest {
    pub code: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub code_verifier: String,
}

pub struct RefreshRequest {
    pub refresh_token: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

pub struct OAuth2Server {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenService>,
    rbac: Arc<RbacEngine>,
    hasher: Arc<PasswordHasher>,
    config: OAuthConfig,
}

impl OAuth2Server {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<TokenService>,
        rbac: Arc<RbacEngine>,
        hasher: Arc<PasswordHasher>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            rbac,
            hasher,
            config,
        }
    }

    /// Issue a single-use code for the authenticated user in `ctx`. The code
    /// acts in the client's organization, where the user must be a member.
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        request: AuthorizeRequest,
    ) -> Result<AuthorizationGrant, ServiceError> {
        let user_id = ctx.require_user()?;
        let client = self.load_client(ctx, &request.client_id).await?;

        if !client.has_redirect_uri(&request.redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "redirect_uri is not registered for this client".to_string(),
            )
            .into());
        }

        let method: CodeChallengeMethod = request
            .code_challenge_method
            .parse()
            .map_err(OAuthError::InvalidRequest)?;
        if method == CodeChallengeMethod::Plain && !self.config.allow_plain_pkce {
            return Err(OAuthError::InvalidRequest(
                "code_challenge_method plain is not allowed".to_string(),
            )
            .into());
        }
        if !pkce::is_valid_challenge(&request.code_challenge, method) {
            return Err(OAuthError::InvalidRequest("malformed code_challenge".to_string()).into());
        }

        let scopes = parse_scope(&request.scope);
        if scopes.is_empty() {
            return Err(OAuthError::InvalidScope("scope is required".to_string()).into());
        }
        if let Some(denied) = scopes.iter().find(|s| !client.allows_scope(s)) {
            return Err(OAuthError::InvalidScope(format!(
                "scope {} is not allowed for this client",
                denied
            ))
            .into());
        }

        let organization_id = client.organization_id;
        self.ensure_member(ctx, user_id, organization_id)
            .await?
            .ok_or(ServiceError::ForeignTenant)?;

        // a client can never be delegated more than the user holds
        for scope in scopes.iter().filter(|s| !is_standard_scope(s)) {
            if !self
                .rbac
                .check_permission(ctx, user_id, organization_id, scope)
                .await?
            {
                return Err(OAuthError::InvalidScope(format!(
                    "scope {} exceeds the user's permissions",
                    scope
                ))
                .into());
            }
        }

        let code = random_token(32);
        let scope = join_scope(&scopes);
        let record = AuthorizationCode::new(
            sha256_hex(&code),
            client.client_id.clone(),
            user_id,
            organization_id,
            request.redirect_uri.clone(),
            scope.clone(),
            request.code_challenge,
            method.as_str().to_string(),
            self.config.authorization_code_expiry_minutes,
        );
        ctx.run(self.store.insert_authorization_code(record)).await?;

        tracing::info!(
            client_id = %client.client_id,
            user_id = %user_id,
            organization_id = %organization_id,
            correlation_id = %ctx.correlation_id,
            "Authorization code issued"
        );

        Ok(AuthorizationGrant {
            code,
            redirect_uri: request.redirect_uri,
            scope,
            expires_in: self.config.authorization_code_expiry_minutes * 60,
        })
    }

    pub async fn exchange_code_for_tokens(
        &self,
        ctx: &RequestContext,
        request: ExchangeRequest,
    ) -> Result<TokenPair, ServiceError> {
        let code_hash = sha256_hex(&request.code);

        let code = ctx
            .run(self.store.find_authorization_code(&code_hash))
            .await?
            .ok_or_else(|| OAuthError::grant("invalid authorization code"))?;

        if code.is_expired() {
            return Err(OAuthError::grant("authorization code has expired").into());
        }
        if code.used {
            tracing::warn!(
                client_id = %code.client_id,
                user_id = %code.user_id,
                correlation_id = %ctx.correlation_id,
                "Authorization code replay"
            );
            return Err(OAuthError::grant("authorization code has already been used").into());
        }

        // Only one caller gets the record back; everyone else lost the race.
        let code = ctx
            .run(self.store.consume_authorization_code(&code_hash, Utc::now()))
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    correlation_id = %ctx.correlation_id,
                    "Concurrent authorization code redemption rejected"
                );
                OAuthError::grant("authorization code has already been used")
            })?;

        if code.client_id != request.client_id {
            return Err(OAuthError::grant("authorization code was issued to another client").into());
        }
        let client = self.load_client(ctx, &request.client_id).await?;
        self.authenticate_client(&client, request.client_secret.as_deref())
            .await?;

        if code.redirect_uri != request.redirect_uri {
            return Err(
                OAuthError::grant("redirect_uri does not match the authorization request").into(),
            );
        }

        let method: CodeChallengeMethod = code
            .code_challenge_method
            .parse()
            .map_err(|_| OAuthError::grant("invalid code verifier"))?;
        if !pkce::verify(&request.code_verifier, &code.code_challenge, method) {
            tracing::warn!(
                client_id = %client.client_id,
                correlation_id = %ctx.correlation_id,
                "PKCE verification failed"
            );
            return Err(OAuthError::grant("invalid code verifier").into());
        }

        let is_superadmin = self
            .ensure_member(ctx, code.user_id, code.organization_id)
            .await?
            .ok_or_else(|| OAuthError::grant("user is no longer authorized for this organization"))?;

        let grant = AccessGrant {
            user_id: code.user_id,
            organization_id: code.organization_id,
            roles: self
                .rbac
                .role_names(ctx, code.user_id, code.organization_id, is_superadmin)
                .await?,
            scope: Some(code.scope.clone()),
            client_id: Some(client.client_id.clone()),
        };
        let pair = self.tokens.issue_token_pair(ctx, &grant, None).await?;

        tracing::info!(
            client_id = %client.client_id,
            user_id = %code.user_id,
            correlation_id = %ctx.correlation_id,
            "Authorization code exchanged"
        );
        Ok(pair)
    }

    /// Rotate a refresh token. The presented token is dead afterwards; the
    /// new one stays in the same family.
    pub async fn refresh_tokens(
        &self,
        ctx: &RequestContext,
        request: RefreshRequest,
    ) -> Result<TokenPair, ServiceError> {
        let token_hash = sha256_hex(&request.refresh_token);

        let token = ctx
            .run(self.store.find_refresh_token(&token_hash))
            .await?
            .ok_or_else(|| OAuthError::grant("invalid refresh token"))?;

        if token.is_revoked() {
            return Err(self.reuse_detected(ctx, token.family_id, token.user_id).await);
        }
        if token.is_expired() {
            return Err(OAuthError::grant("refresh token has expired").into());
        }

        match (&token.client_id, &request.client_id) {
            (Some(bound), Some(presented)) if bound == presented => {
                let client = self.load_client(ctx, presented).await?;
                self.authenticate_client(&client, request.client_secret.as_deref())
                    .await?;
            }
            (None, None) => {}
            _ => {
                return Err(
                    OAuthError::grant("refresh token was issued to another client").into(),
                );
            }
        }

        let token = match ctx
            .run(self.store.rotate_refresh_token(&token_hash, Utc::now()))
            .await?
        {
            Some(token) => token,
            None => return Err(self.reuse_detected(ctx, token.family_id, token.user_id).await),
        };

        let is_superadmin = self
            .ensure_member(ctx, token.user_id, token.organization_id)
            .await?
            .ok_or_else(|| OAuthError::grant("user is no longer authorized for this organization"))?;

        let grant = AccessGrant {
            user_id: token.user_id,
            organization_id: token.organization_id,
            roles: self
                .rbac
                .role_names(ctx, token.user_id, token.organization_id, is_superadmin)
                .await?,
            scope: (!token.scope.is_empty()).then(|| token.scope.clone()),
            client_id: token.client_id.clone(),
        };
        let pair = self
            .tokens
            .issue_token_pair(ctx, &grant, Some(token.family_id))
            .await?;

        tracing::info!(
            user_id = %token.user_id,
            family_id = %token.family_id,
            correlation_id = %ctx.correlation_id,
            "Refresh token rotated"
        );
        Ok(pair)
    }

    async fn reuse_detected(&self, ctx: &RequestContext, family_id: Uuid, user_id: Uuid) -> ServiceError {
        tracing::warn!(
            family_id = %family_id,
            user_id = %user_id,
            correlation_id = %ctx.correlation_id,
            "Refresh token reuse detected; revoking family"
        );

        match ctx
            .run(self.store.revoke_refresh_family(family_id, Utc::now()))
            .await
        {
            Ok(revoked) => {
                tracing::info!(family_id = %family_id, revoked, "Refresh token family revoked");
                OAuthError::RefreshTokenReuseDetected.into()
            }
            Err(e) => e,
        }
    }

    async fn load_client(
        &self,
        ctx: &RequestContext,
        client_id: &str,
    ) -> Result<ClientApplication, ServiceError> {
        match ctx.run(self.store.get_client(client_id)).await? {
            Some(client) if client.enabled => Ok(client),
            _ => {
                tracing::warn!(
                    client_id = %client_id,
                    correlation_id = %ctx.correlation_id,
                    "Unknown or disabled client"
                );
                Err(OAuthError::InvalidClient.into())
            }
        }
    }

    /// Public clients have no secret and rely on PKCE alone. Confidential
    /// clients must present the current secret, or the previous one while its
    /// grace window lasts.
    async fn authenticate_client(
        &self,
        client: &ClientApplication,
        secret: Option<&str>,
    ) -> Result<(), ServiceError> {
        if !client.is_confidential() {
            return Ok(());
        }

        let Some(secret) = secret.filter(|s| !s.is_empty()) else {
            return Err(OAuthError::InvalidClient.into());
        };

        if let Some(current) = &client.client_secret_hash {
            if self.hasher.verify(secret, current).await? {
                return Ok(());
            }
        }
        if let Some(previous) = client.previous_secret_in_grace(Utc::now()) {
            if self.hasher.verify(secret, previous).await? {
                tracing::info!(client_id = %client.client_id, "Client authenticated with previous secret");
                return Ok(());
            }
        }

        tracing::warn!(client_id = %client.client_id, "Client authentication failed");
        Err(OAuthError::InvalidClient.into())
    }

    /// `Some(is_superadmin)` when the user is active, the organization is
    /// enabled and the user holds an active membership there (superadmins
    /// need none).
    async fn ensure_member(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<bool>, ServiceError> {
        let Some(user) = ctx.run(self.store.get_user(user_id)).await? else {
            return Ok(None);
        };
        if !user.is_active() {
            return Ok(None);
        }
        match ctx.run(self.store.get_organization(organization_id)).await? {
            Some(org) if org.enabled => {}
            _ => return Ok(None),
        }
        if user.is_superadmin {
            return Ok(Some(true));
        }
        let member = ctx
            .run(self.store.find_active_membership(user_id, organization_id))
            .await?
            .is_some();
        Ok(member.then_some(false))
    }
}
