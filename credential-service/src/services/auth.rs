use chrono::{Duration, Utc};
use serde::Serialize;
use service_core::utils::{random_token, sha256_hex};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{LockoutConfig, RateLimitConfig};
use crate::context::RequestContext;
use crate::models::{SanitizedUser, TokenPurpose, User, VerificationToken};
use crate::services::email::EmailProvider;
use crate::services::error::ServiceError;
use crate::services::jwt::{AccessGrant, AccessTokenClaims, TokenPair, TokenService};
use crate::services::password::PasswordHasher;
use crate::services::rate_limit::RateLimiter;
use crate::services::rbac::RbacEngine;
use crate::store::CredentialStore;
use crate::utils::validation::{is_valid_email, normalize_email};
use crate::utils::Password;

/// RFC 7662-style introspection result.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectResponse {
    fn inactive() -> Self {
        Self::default()
    }

    fn from_claims(claims: AccessTokenClaims) -> Self {
        Self {
            active: true,
            sub: Some(claims.sub),
            org: Some(claims.org),
            roles: Some(claims.roles),
            scope: claims.scope,
            client_id: claims.client_id,
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            jti: Some(claims.jti),
        }
    }
}

/// First-party authentication: registration, password login, resets.
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<PasswordHasher>,
    tokens: Arc<TokenService>,
    rbac: Arc<RbacEngine>,
    limiter: Arc<RateLimiter>,
    email: Arc<dyn EmailProvider>,
    rate_limits: RateLimitConfig,
    lockout: LockoutConfig,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<PasswordHasher>,
        tokens: Arc<TokenService>,
        rbac: Arc<RbacEngine>,
        limiter: Arc<RateLimiter>,
        email: Arc<dyn EmailProvider>,
        rate_limits: RateLimitConfig,
        lockout: LockoutConfig,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            rbac,
            limiter,
            email,
            rate_limits,
            lockout,
        }
    }

    pub async fn register(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &Password,
        display_name: Option<String>,
    ) -> Result<SanitizedUser, ServiceError> {
        if let Some(ip) = ctx.ip_address {
            self.limiter
                .check(ctx, "register_ip", &ip.to_string(), self.rate_limits.register_per_ip)
                .await?;
        }

        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(ServiceError::Validation("Invalid email format".to_string()));
        }

        // strength is checked before the duplicate lookup and before hashing
        let password_hash = self.hasher.hash(password).await?;

        if ctx
            .run(self.store.find_user_by_email(&email))
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("email already registered".to_string()));
        }

        let user = ctx
            .run(self.store.create_user(User::new(email.clone(), password_hash, display_name)))
            .await?;

        tracing::info!(
            user_id = %user.user_id,
            correlation_id = %ctx.correlation_id,
            "User registered"
        );

        let token = random_token(32);
        ctx.run(self.store.insert_verification_token(
            VerificationToken::new_email_verification(user.user_id, sha256_hex(&token)),
        ))
        .await?;

        let mailer = self.email.clone();
        let user_id = user.user_id;
        tokio::spawn(async move {
            if let Err(e) = mailer.send_verification_email(&email, &token).await {
                tracing::error!(user_id = %user_id, error = %e, "Failed to send verification email");
            }
        });

        Ok(user.sanitized())
    }

    pub async fn verify_email(&self, ctx: &RequestContext, token: &str) -> Result<(), ServiceError> {
        let record = ctx
            .run(self.store.consume_verification_token(
                &sha256_hex(token),
                TokenPurpose::EmailVerification.as_str(),
                Utc::now(),
            ))
            .await?
            .ok_or_else(|| {
                ServiceError::Validation("invalid or expired verification token".to_string())
            })?;

        ctx.run(self.store.set_email_verified(record.user_id)).await?;

        tracing::info!(user_id = %record.user_id, "Email verified for user");
        Ok(())
    }

    /// Password login into one organization. Every failure is the same
    /// `InvalidCredentials`, whatever the reason.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &Password,
        organization_id: Uuid,
    ) -> Result<TokenPair, ServiceError> {
        let email = normalize_email(email);

        if let Some(ip) = ctx.ip_address {
            self.limiter
                .check(ctx, "login_ip", &ip.to_string(), self.rate_limits.login_per_ip)
                .await?;
        }
        self.limiter
            .check(ctx, "login_email", &email, self.rate_limits.login_per_email)
            .await?;

        let Some(user) = ctx.run(self.store.find_user_by_email(&email)).await? else {
            self.hasher.verify_dummy(password.expose()).await?;
            tracing::warn!(correlation_id = %ctx.correlation_id, "Login failed: unknown account");
            return Err(ServiceError::InvalidCredentials);
        };

        let now = Utc::now();
        let password_ok = self
            .hasher
            .verify(password.expose(), &user.password_hash)
            .await?;

        if user.is_locked(now) {
            tracing::warn!(user_id = %user.user_id, "Login failed: account locked");
            return Err(ServiceError::InvalidCredentials);
        }

        if !password_ok {
            let failed = ctx
                .run(self.store.record_failed_login(
                    user.user_id,
                    self.lockout.max_failed_attempts,
                    now + Duration::minutes(self.lockout.lockout_minutes),
                ))
                .await?;
            if failed.locked {
                tracing::warn!(
                    user_id = %user.user_id,
                    lockout_minutes = self.lockout.lockout_minutes,
                    "Account locked after repeated failed logins"
                );
            } else {
                tracing::warn!(
                    user_id = %user.user_id,
                    attempts = failed.attempts,
                    "Login failed: wrong password"
                );
            }
            return Err(ServiceError::InvalidCredentials);
        }

        if !user.is_active() || !user.email_verified {
            tracing::warn!(
                user_id = %user.user_id,
                status = %user.status,
                email_verified = user.email_verified,
                "Login failed: account not usable"
            );
            return Err(ServiceError::InvalidCredentials);
        }

        if user.failed_login_attempts > 0 || user.locked_until.is_some() {
            ctx.run(self.store.reset_failed_logins(user.user_id)).await?;
        }

        if self.hasher.needs_rehash(&user.password_hash) {
            self.rehash(ctx, &user, password).await;
        }

        let org_usable = matches!(
            ctx.run(self.store.get_organization(organization_id)).await?,
            Some(org) if org.enabled
        );
        let member = user.is_superadmin
            || ctx
                .run(self.store.find_active_membership(user.user_id, organization_id))
                .await?
                .is_some();
        if !org_usable || !member {
            tracing::warn!(
                user_id = %user.user_id,
                organization_id = %organization_id,
                "Login failed: no access to organization"
            );
            return Err(ServiceError::InvalidCredentials);
        }

        let grant = AccessGrant {
            user_id: user.user_id,
            organization_id,
            roles: self
                .rbac
                .role_names(ctx, user.user_id, organization_id, user.is_superadmin)
                .await?,
            scope: None,
            client_id: None,
        };
        let pair = self.tokens.issue_token_pair(ctx, &grant, None).await?;

        tracing::info!(
            user_id = %user.user_id,
            organization_id = %organization_id,
            correlation_id = %ctx.correlation_id,
            "User authenticated"
        );
        Ok(pair)
    }

    /// Denylist the access token and end the refresh token's family.
    pub async fn logout(
        &self,
        ctx: &RequestContext,
        claims: &AccessTokenClaims,
        refresh_token: Option<&str>,
    ) -> Result<(), ServiceError> {
        self.tokens
            .revocation()
            .revoke_token(ctx, &claims.jti, claims.exp)
            .await?;

        if let Some(refresh_token) = refresh_token {
            let record = ctx
                .run(self.store.find_refresh_token(&sha256_hex(refresh_token)))
                .await?;
            // someone else's refresh token is ignored, not revoked
            if let Some(record) = record.filter(|r| r.user_id.to_string() == claims.sub) {
                ctx.run(self.store.revoke_refresh_family(record.family_id, Utc::now()))
                    .await?;
            }
        }

        tracing::info!(user_id = %claims.sub, "User logged out");
        Ok(())
    }

    /// Succeeds whether or not the account exists.
    pub async fn request_password_reset(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<(), ServiceError> {
        let email = normalize_email(email);

        if let Some(ip) = ctx.ip_address {
            self.limiter
                .check(
                    ctx,
                    "password_reset_ip",
                    &ip.to_string(),
                    self.rate_limits.password_reset_per_ip,
                )
                .await?;
        }
        self.limiter
            .check(
                ctx,
                "password_reset_email",
                &email,
                self.rate_limits.password_reset_per_email,
            )
            .await?;

        let Some(user) = ctx.run(self.store.find_user_by_email(&email)).await? else {
            return Ok(());
        };
        if !user.is_active() {
            return Ok(());
        }

        let token = random_token(32);
        ctx.run(self.store.insert_verification_token(
            VerificationToken::new_password_reset(user.user_id, sha256_hex(&token)),
        ))
        .await?;

        let mailer = self.email.clone();
        let user_id = user.user_id;
        tokio::spawn(async move {
            if let Err(e) = mailer.send_password_reset_email(&email, &token).await {
                tracing::error!(user_id = %user_id, error = %e, "Failed to send password reset email");
            }
        });

        tracing::info!(user_id = %user.user_id, "Password reset requested");
        Ok(())
    }

    /// Set a new password from a reset token and end every session.
    pub async fn confirm_password_reset(
        &self,
        ctx: &RequestContext,
        token: &str,
        new_password: &Password,
    ) -> Result<(), ServiceError> {
        // a weak password must not burn the token
        self.hasher.validate_strength(new_password.expose())?;

        let record = ctx
            .run(self.store.consume_verification_token(
                &sha256_hex(token),
                TokenPurpose::PasswordReset.as_str(),
                Utc::now(),
            ))
            .await?
            .ok_or_else(|| ServiceError::Validation("invalid or expired reset token".to_string()))?;

        let password_hash = self.hasher.hash(new_password).await?;
        ctx.run(self.store.update_user_password(record.user_id, &password_hash))
            .await?;
        ctx.run(self.store.reset_failed_logins(record.user_id)).await?;

        self.tokens
            .revocation()
            .revoke_user_sessions(ctx, record.user_id)
            .await?;

        tracing::info!(user_id = %record.user_id, "Password reset successful");
        Ok(())
    }

    /// Change the caller's password. Every existing session is revoked; when
    /// the context names an organization a fresh pair is returned for it.
    pub async fn change_password(
        &self,
        ctx: &RequestContext,
        current: &Password,
        new_password: &Password,
    ) -> Result<Option<TokenPair>, ServiceError> {
        let user_id = ctx.require_user()?;
        let user = ctx
            .run(self.store.get_user(user_id))
            .await?
            .ok_or(ServiceError::Unauthenticated)?;

        if !self
            .hasher
            .verify(current.expose(), &user.password_hash)
            .await?
        {
            tracing::warn!(user_id = %user_id, "Password change rejected: wrong current password");
            return Err(ServiceError::InvalidCredentials);
        }

        let password_hash = self.hasher.hash(new_password).await?;
        ctx.run(self.store.update_user_password(user_id, &password_hash))
            .await?;
        self.tokens
            .revocation()
            .revoke_user_sessions(ctx, user_id)
            .await?;

        tracing::info!(user_id = %user_id, "Password changed");

        let Some(organization_id) = ctx.organization_id else {
            return Ok(None);
        };
        let grant = AccessGrant {
            user_id,
            organization_id,
            roles: self
                .rbac
                .role_names(ctx, user_id, organization_id, user.is_superadmin)
                .await?,
            scope: None,
            client_id: None,
        };
        Ok(Some(self.tokens.issue_token_pair(ctx, &grant, None).await?))
    }

    /// Never fails. Anything short of a fully valid token is inactive.
    pub async fn introspect(&self, ctx: &RequestContext, token: &str) -> IntrospectResponse {
        match self.tokens.validate(ctx, token).await {
            Ok(claims) => IntrospectResponse::from_claims(claims),
            Err(ServiceError::TokenExpired | ServiceError::TokenInvalid | ServiceError::TokenRevoked) => {
                IntrospectResponse::inactive()
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    correlation_id = %ctx.correlation_id,
                    "Revocation lookup failed during introspection"
                );
                IntrospectResponse::inactive()
            }
        }
    }

    /// Upgrade a hash made with outdated parameters. Failure only costs the
    /// upgrade.
    async fn rehash(&self, ctx: &RequestContext, user: &User, password: &Password) {
        let result = async {
            let upgraded = self.hasher.hash_secret(password.expose()).await?;
            ctx.run(self.store.update_user_password(user.user_id, &upgraded))
                .await
        }
        .await;

        match result {
            Ok(()) => tracing::info!(user_id = %user.user_id, "Password hash upgraded"),
            Err(e) => tracing::warn!(user_id = %user.user_id, error = %e, "Password rehash failed"),
        }
    }
}
