//! Credential store abstraction.
//!
//! Every single-use record (authorization codes, refresh tokens, verification
//! tokens) is consumed through a compare-and-swap method that returns the
//! record only to the one caller whose conditional update won.

use crate::models::{
    AuthorizationCode, ClientApplication, Membership, Organization, Permission, RefreshToken,
    Role, User, VerificationToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("refresh token family {0} has been revoked")]
    FamilyRevoked(Uuid),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of recording a failed password attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub attempts: i32,
    pub locked: bool,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    // users
    async fn create_user(&self, user: User) -> StoreResult<User>;
    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn update_user_password(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()>;
    async fn update_user_status(&self, user_id: Uuid, status: &str) -> StoreResult<()>;
    async fn set_email_verified(&self, user_id: Uuid) -> StoreResult<()>;
    /// Atomically bumps the failure counter. Reaching `max_attempts` sets
    /// `locked_until` and resets the counter.
    async fn record_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        locked_until: DateTime<Utc>,
    ) -> StoreResult<FailedLogin>;
    /// Clears the failure counter and any lock.
    async fn reset_failed_logins(&self, user_id: Uuid) -> StoreResult<()>;

    // organizations and memberships
    async fn create_organization(&self, org: Organization) -> StoreResult<Organization>;
    async fn get_organization(&self, organization_id: Uuid) -> StoreResult<Option<Organization>>;
    /// Fails with `Conflict` if the user already holds an active membership.
    async fn create_membership(&self, membership: Membership) -> StoreResult<Membership>;
    async fn find_active_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> StoreResult<Option<Membership>>;
    async fn update_membership_role(&self, membership_id: Uuid, role_id: Uuid) -> StoreResult<()>;
    async fn update_membership_status(&self, membership_id: Uuid, status: &str)
    -> StoreResult<()>;
    async fn count_active_memberships_for_role(&self, role_id: Uuid) -> StoreResult<i64>;

    // roles and permissions
    async fn create_role(&self, role: Role) -> StoreResult<Role>;
    async fn get_role(&self, role_id: Uuid) -> StoreResult<Option<Role>>;
    async fn find_system_role(&self, name: &str) -> StoreResult<Option<Role>>;
    /// System roles plus the custom roles of `organization_id`.
    async fn list_roles(&self, organization_id: Uuid) -> StoreResult<Vec<Role>>;
    async fn rename_role(&self, role_id: Uuid, name: &str) -> StoreResult<()>;
    /// Removes the role and its permission links.
    async fn delete_role(&self, role_id: Uuid) -> StoreResult<()>;

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission>;
    async fn get_permission(&self, permission_id: Uuid) -> StoreResult<Option<Permission>>;
    /// `organization_id = None` looks up a system permission.
    async fn find_permission_by_name(
        &self,
        organization_id: Option<Uuid>,
        name: &str,
    ) -> StoreResult<Option<Permission>>;
    /// System permissions plus the custom permissions of `organization_id`.
    async fn list_permissions(&self, organization_id: Uuid) -> StoreResult<Vec<Permission>>;
    /// Removes the permission and its links; returns the roles that lost it.
    async fn delete_permission(&self, permission_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Idempotent. Implementations reject links that break tenant isolation
    /// even when the caller did not check.
    async fn add_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<()>;
    /// Returns whether a link was removed.
    async fn remove_role_permission(&self, role_id: Uuid, permission_id: Uuid)
    -> StoreResult<bool>;
    async fn list_role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>>;

    // client applications
    async fn create_client(&self, client: ClientApplication) -> StoreResult<ClientApplication>;
    async fn get_client(&self, client_id: &str) -> StoreResult<Option<ClientApplication>>;
    async fn update_client_secret(
        &self,
        client_id: &str,
        secret_hash: &str,
        previous_hash: Option<&str>,
        previous_expiry: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
    async fn set_client_enabled(&self, client_id: &str, enabled: bool) -> StoreResult<()>;

    // authorization codes
    async fn insert_authorization_code(&self, code: AuthorizationCode) -> StoreResult<()>;
    async fn find_authorization_code(
        &self,
        code_hash: &str,
    ) -> StoreResult<Option<AuthorizationCode>>;
    /// `used: false -> true`. `None` means another caller already won.
    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AuthorizationCode>>;

    // refresh tokens
    /// Starts a new family or extends a live one. Fails with `FamilyRevoked`
    /// once any revocation below has covered the token's family, so a
    /// rotation that lost a race against a revocation cannot mint a live
    /// successor.
    async fn insert_refresh_token(&self, token: RefreshToken) -> StoreResult<()>;
    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>>;
    /// `revoked_at: NULL -> now`. `None` means the token was already revoked.
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>>;
    /// The bulk revocations mark every covered family revoked, including
    /// families whose only token was just rotated away, then revoke their
    /// live tokens. They return the number of tokens revoked.
    async fn revoke_refresh_family(&self, family_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;
    async fn revoke_user_refresh_tokens(&self, user_id: Uuid, now: DateTime<Utc>)
    -> StoreResult<u64>;
    async fn revoke_org_refresh_tokens(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn revoke_user_org_refresh_tokens(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn revoke_client_refresh_tokens(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    // verification tokens
    async fn insert_verification_token(&self, token: VerificationToken) -> StoreResult<()>;
    /// Marks an unexpired, unconsumed token of `purpose` consumed.
    async fn consume_verification_token(
        &self,
        token_hash: &str,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationToken>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
