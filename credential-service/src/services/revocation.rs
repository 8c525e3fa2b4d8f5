//! Denylist and "revoked-before" watermarks for issued access tokens.
//!
//! Access tokens are never stored. A single token is revoked by denylisting
//! its `jti` until the token would have expired anyway. Whole sessions are
//! revoked by recording a watermark; any token whose `iat_us` is before
//! the watermark is rejected. Watermarks only need to outlive the tokens they
//! cut off, so they expire after one access-token lifetime.
//!
//! Session revocations revoke refresh-token families first and write the
//! watermark last. A refresh racing the revocation either fails to insert its
//! successor or has already minted its access token, which then predates the
//! watermark.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::services::error::ServiceError;
use crate::services::jwt::AccessTokenClaims;
use crate::services::redis::KeyValueStore;
use crate::store::CredentialStore;

fn jti_key(jti: &str) -> String {
    format!("revoked:jti:{}", jti)
}

fn user_key(user_id: &str) -> String {
    format!("revoked_before:user:{}", user_id)
}

fn org_key(organization_id: &str) -> String {
    format!("revoked_before:org:{}", organization_id)
}

fn user_org_key(user_id: &str, organization_id: &str) -> String {
    format!("revoked_before:user_org:{}:{}", user_id, organization_id)
}

pub struct RevocationStore {
    cache: Arc<dyn KeyValueStore>,
    store: Arc<dyn CredentialStore>,
    watermark_ttl_seconds: u64,
}

impl RevocationStore {
    /// `max_token_lifetime_seconds` is the access-token TTL plus validation
    /// leeway.
    pub fn new(
        cache: Arc<dyn KeyValueStore>,
        store: Arc<dyn CredentialStore>,
        max_token_lifetime_seconds: u64,
    ) -> Self {
        Self {
            cache,
            store,
            watermark_ttl_seconds: max_token_lifetime_seconds.max(1),
        }
    }

    /// Denylist one token until its `exp`. Already-expired tokens need no entry.
    pub async fn revoke_token(
        &self,
        ctx: &RequestContext,
        jti: &str,
        expires_at: i64,
    ) -> Result<(), ServiceError> {
        let remaining = expires_at - Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }

        ctx.run(
            self.cache
                .set_with_ttl(&jti_key(jti), "1", remaining as u64),
        )
        .await?;

        tracing::info!(
            jti = %jti,
            correlation_id = %ctx.correlation_id,
            "Access token revoked"
        );
        Ok(())
    }

    /// Cut off every access token of the user and revoke all of their refresh
    /// tokens. Returns the number of refresh tokens revoked.
    pub async fn revoke_user_sessions(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let revoked = ctx
            .run(self.store.revoke_user_refresh_tokens(user_id, Utc::now()))
            .await?;
        self.set_watermark(ctx, &user_key(&user_id.to_string()))
            .await?;

        tracing::info!(
            user_id = %user_id,
            refresh_tokens_revoked = revoked,
            correlation_id = %ctx.correlation_id,
            "User sessions revoked"
        );
        Ok(revoked)
    }

    pub async fn revoke_org_sessions(
        &self,
        ctx: &RequestContext,
        organization_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let revoked = ctx
            .run(
                self.store
                    .revoke_org_refresh_tokens(organization_id, Utc::now()),
            )
            .await?;
        self.set_watermark(ctx, &org_key(&organization_id.to_string()))
            .await?;

        tracing::info!(
            organization_id = %organization_id,
            refresh_tokens_revoked = revoked,
            correlation_id = %ctx.correlation_id,
            "Organization sessions revoked"
        );
        Ok(revoked)
    }

    /// Narrower than either single-dimension revocation. Used when a
    /// membership changes or ends.
    pub async fn revoke_user_in_org(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let revoked = ctx
            .run(self.store.revoke_user_org_refresh_tokens(
                user_id,
                organization_id,
                Utc::now(),
            ))
            .await?;
        self.set_watermark(
            ctx,
            &user_org_key(&user_id.to_string(), &organization_id.to_string()),
        )
        .await?;

        tracing::info!(
            user_id = %user_id,
            organization_id = %organization_id,
            refresh_tokens_revoked = revoked,
            correlation_id = %ctx.correlation_id,
            "User sessions in organization revoked"
        );
        Ok(revoked)
    }

    /// Fails with `TokenRevoked` if the token is denylisted or predates any
    /// watermark that covers it.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        claims: &AccessTokenClaims,
    ) -> Result<(), ServiceError> {
        let jti = jti_key(&claims.jti);
        let user = user_key(&claims.sub);
        let org = org_key(&claims.org);
        let user_org = user_org_key(&claims.sub, &claims.org);

        let (denylisted, user_mark, org_mark, user_org_mark) = ctx
            .run(async {
                tokio::try_join!(
                    self.cache.exists(&jti),
                    self.cache.get(&user),
                    self.cache.get(&org),
                    self.cache.get(&user_org),
                )
            })
            .await?;

        if denylisted {
            return Err(ServiceError::TokenRevoked);
        }

        for mark in [user_mark, org_mark, user_org_mark].into_iter().flatten() {
            let watermark: i64 = mark
                .parse()
                .map_err(|e| anyhow::anyhow!("Corrupt revocation watermark {}: {}", mark, e))?;
            if claims.iat_us < watermark {
                return Err(ServiceError::TokenRevoked);
            }
        }

        Ok(())
    }

    async fn set_watermark(&self, ctx: &RequestContext, key: &str) -> Result<(), ServiceError> {
        let now_us = Utc::now().timestamp_micros();
        ctx.run(self.cache.set_with_ttl(
            key,
            &now_us.to_string(),
            self.watermark_ttl_seconds,
        ))
        .await
    }
}
