//! In-memory credential store.
//!
//! All state lives behind one `tokio::sync::RwLock`. Conditional updates take
//! the write lock for the whole check-and-set, which gives them the same
//! single-winner semantics as the conditional `UPDATE`s in the Postgres
//! backend. Not durable; used by tests and local development.

use super::{CredentialStore, FailedLogin, StoreError, StoreResult};
use crate::models::{
    AuthorizationCode, ClientApplication, Membership, MembershipStatus, Organization, Permission,
    RefreshToken, Role, RolePermission, User, VerificationToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    organizations: HashMap<Uuid, Organization>,
    memberships: HashMap<Uuid, Membership>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: HashSet<RolePermission>,
    clients: HashMap<String, ClientApplication>,
    codes: HashMap<String, AuthorizationCode>,
    refresh_tokens: HashMap<String, RefreshToken>,
    revoked_families: HashSet<Uuid>,
    verification_tokens: HashMap<String, VerificationToken>,
}

impl State {
    fn user_mut(&mut self, user_id: Uuid) -> StoreResult<&mut User> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))
    }

    fn client_mut(&mut self, client_id: &str) -> StoreResult<&mut ClientApplication> {
        self.clients
            .get_mut(client_id)
            .ok_or_else(|| StoreError::NotFound(format!("client {}", client_id)))
    }

    /// Marks the family of every matching token, rotated-away ones included,
    /// then revokes the live ones.
    fn revoke_where(&mut self, now: DateTime<Utc>, pred: impl Fn(&RefreshToken) -> bool) -> u64 {
        let mut count = 0;
        for token in self.refresh_tokens.values_mut() {
            if !pred(token) {
                continue;
            }
            self.revoked_families.insert(token.family_id);
            if token.revoked_at.is_none() {
                token.revoked_at = Some(now);
                count += 1;
            }
        }
        count
    }
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    state: RwLock<State>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create_user(&self, user: User) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }
        state.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user_password(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state.user_mut(user_id)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_user_status(&self, user_id: Uuid, status: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state.user_mut(user_id)?;
        user.status = status.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_email_verified(&self, user_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state.user_mut(user_id)?;
        user.email_verified = true;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        locked_until: DateTime<Utc>,
    ) -> StoreResult<FailedLogin> {
        let mut state = self.state.write().await;
        let user = state.user_mut(user_id)?;
        user.failed_login_attempts += 1;
        let attempts = user.failed_login_attempts;
        let locked = attempts >= max_attempts;
        if locked {
            user.locked_until = Some(locked_until);
            user.failed_login_attempts = 0;
        }
        Ok(FailedLogin { attempts, locked })
    }

    async fn reset_failed_logins(&self, user_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state.user_mut(user_id)?;
        user.failed_login_attempts = 0;
        user.locked_until = None;
        Ok(())
    }

    async fn create_organization(&self, org: Organization) -> StoreResult<Organization> {
        let mut state = self.state.write().await;
        if state.organizations.values().any(|o| o.slug == org.slug) {
            return Err(StoreError::Conflict(format!("organization slug {}", org.slug)));
        }
        state.organizations.insert(org.organization_id, org.clone());
        Ok(org)
    }

    async fn get_organization(&self, organization_id: Uuid) -> StoreResult<Option<Organization>> {
        Ok(self.state.read().await.organizations.get(&organization_id).cloned())
    }

    async fn create_membership(&self, membership: Membership) -> StoreResult<Membership> {
        let mut state = self.state.write().await;
        let duplicate = state.memberships.values().any(|m| {
            m.user_id == membership.user_id
                && m.organization_id == membership.organization_id
                && m.is_active()
        });
        if duplicate {
            return Err(StoreError::Conflict(
                "user already has an active membership in this organization".to_string(),
            ));
        }
        state.memberships.insert(membership.membership_id, membership.clone());
        Ok(membership)
    }

    async fn find_active_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> StoreResult<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .find(|m| m.user_id == user_id && m.organization_id == organization_id && m.is_active())
            .cloned())
    }

    async fn update_membership_role(&self, membership_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let membership = state
            .memberships
            .get_mut(&membership_id)
            .ok_or_else(|| StoreError::NotFound(format!("membership {}", membership_id)))?;
        membership.role_id = role_id;
        membership.updated_at = Utc::now();
        Ok(())
    }

    async fn update_membership_status(
        &self,
        membership_id: Uuid,
        status: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let membership = state
            .memberships
            .get_mut(&membership_id)
            .ok_or_else(|| StoreError::NotFound(format!("membership {}", membership_id)))?;
        membership.status = status.to_string();
        membership.updated_at = Utc::now();
        Ok(())
    }

    async fn count_active_memberships_for_role(&self, role_id: Uuid) -> StoreResult<i64> {
        let state = self.state.read().await;
        let count = state
            .memberships
            .values()
            .filter(|m| m.role_id == role_id && m.status == MembershipStatus::Active.as_str())
            .count();
        Ok(count as i64)
    }

    async fn create_role(&self, role: Role) -> StoreResult<Role> {
        let mut state = self.state.write().await;
        let duplicate = state
            .roles
            .values()
            .any(|r| r.organization_id == role.organization_id && r.name == role.name);
        if duplicate {
            return Err(StoreError::Conflict(format!("role {}", role.name)));
        }
        state.roles.insert(role.role_id, role.clone());
        Ok(role)
    }

    async fn get_role(&self, role_id: Uuid) -> StoreResult<Option<Role>> {
        Ok(self.state.read().await.roles.get(&role_id).cloned())
    }

    async fn find_system_role(&self, name: &str) -> StoreResult<Option<Role>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .values()
            .find(|r| r.is_system && r.name == name)
            .cloned())
    }

    async fn list_roles(&self, organization_id: Uuid) -> StoreResult<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state
            .roles
            .values()
            .filter(|r| r.usable_in(organization_id))
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn rename_role(&self, role_id: Uuid, name: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let org = state
            .roles
            .get(&role_id)
            .map(|r| r.organization_id)
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role_id)))?;
        let taken = state
            .roles
            .values()
            .any(|r| r.role_id != role_id && r.organization_id == org && r.name == name);
        if taken {
            return Err(StoreError::Conflict(format!("role {}", name)));
        }
        if let Some(role) = state.roles.get_mut(&role_id) {
            role.name = name.to_string();
        }
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.roles.remove(&role_id).is_none() {
            return Err(StoreError::NotFound(format!("role {}", role_id)));
        }
        state.role_permissions.retain(|rp| rp.role_id != role_id);
        Ok(())
    }

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        let mut state = self.state.write().await;
        let duplicate = state.permissions.values().any(|p| {
            p.organization_id == permission.organization_id && p.name == permission.name
        });
        if duplicate {
            return Err(StoreError::Conflict(format!("permission {}", permission.name)));
        }
        state
            .permissions
            .insert(permission.permission_id, permission.clone());
        Ok(permission)
    }

    async fn get_permission(&self, permission_id: Uuid) -> StoreResult<Option<Permission>> {
        Ok(self.state.read().await.permissions.get(&permission_id).cloned())
    }

    async fn find_permission_by_name(
        &self,
        organization_id: Option<Uuid>,
        name: &str,
    ) -> StoreResult<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state
            .permissions
            .values()
            .find(|p| p.organization_id == organization_id && p.name == name)
            .cloned())
    }

    async fn list_permissions(&self, organization_id: Uuid) -> StoreResult<Vec<Permission>> {
        let state = self.state.read().await;
        let mut perms: Vec<Permission> = state
            .permissions
            .values()
            .filter(|p| p.is_system || p.organization_id == Some(organization_id))
            .cloned()
            .collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(perms)
    }

    async fn delete_permission(&self, permission_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let mut state = self.state.write().await;
        if state.permissions.remove(&permission_id).is_none() {
            return Err(StoreError::NotFound(format!("permission {}", permission_id)));
        }
        let affected = state
            .role_permissions
            .iter()
            .filter(|rp| rp.permission_id == permission_id)
            .map(|rp| rp.role_id)
            .collect();
        state
            .role_permissions
            .retain(|rp| rp.permission_id != permission_id);
        Ok(affected)
    }

    async fn add_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let role = state
            .roles
            .get(&role_id)
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role_id)))?;
        let permission = state
            .permissions
            .get(&permission_id)
            .ok_or_else(|| StoreError::NotFound(format!("permission {}", permission_id)))?;
        if !permission.assignable_to(role) {
            return Err(StoreError::Conflict(
                "custom permission and role belong to different organizations".to_string(),
            ));
        }
        state.role_permissions.insert(RolePermission {
            role_id,
            permission_id,
        });
        Ok(())
    }

    async fn remove_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.role_permissions.remove(&RolePermission {
            role_id,
            permission_id,
        }))
    }

    async fn list_role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        let state = self.state.read().await;
        let mut perms: Vec<Permission> = state
            .role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id)
            .filter_map(|rp| state.permissions.get(&rp.permission_id).cloned())
            .collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(perms)
    }

    async fn create_client(&self, client: ClientApplication) -> StoreResult<ClientApplication> {
        let mut state = self.state.write().await;
        if state.clients.contains_key(&client.client_id) {
            return Err(StoreError::Conflict(format!("client {}", client.client_id)));
        }
        state.clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    async fn get_client(&self, client_id: &str) -> StoreResult<Option<ClientApplication>> {
        Ok(self.state.read().await.clients.get(client_id).cloned())
    }

    async fn update_client_secret(
        &self,
        client_id: &str,
        secret_hash: &str,
        previous_hash: Option<&str>,
        previous_expiry: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let client = state.client_mut(client_id)?;
        client.client_secret_hash = Some(secret_hash.to_string());
        client.previous_client_secret_hash = previous_hash.map(str::to_string);
        client.previous_secret_expiry = previous_expiry;
        client.updated_at = Utc::now();
        Ok(())
    }

    async fn set_client_enabled(&self, client_id: &str, enabled: bool) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let client = state.client_mut(client_id)?;
        client.enabled = enabled;
        client.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_authorization_code(&self, code: AuthorizationCode) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.codes.contains_key(&code.code_hash) {
            return Err(StoreError::Conflict("authorization code".to_string()));
        }
        state.codes.insert(code.code_hash.clone(), code);
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code_hash: &str,
    ) -> StoreResult<Option<AuthorizationCode>> {
        Ok(self.state.read().await.codes.get(code_hash).cloned())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AuthorizationCode>> {
        let mut state = self.state.write().await;
        match state.codes.get_mut(code_hash) {
            Some(code) if !code.used => {
                code.used = true;
                code.used_at = Some(now);
                Ok(Some(code.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_refresh_token(&self, token: RefreshToken) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.revoked_families.contains(&token.family_id) {
            return Err(StoreError::FamilyRevoked(token.family_id));
        }
        if state.refresh_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("refresh token".to_string()));
        }
        state.refresh_tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(self.state.read().await.refresh_tokens.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>> {
        let mut state = self.state.write().await;
        match state.refresh_tokens.get_mut(token_hash) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(now);
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_refresh_family(&self, family_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        state.revoked_families.insert(family_id);
        Ok(state.revoke_where(now, |t| t.family_id == family_id))
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.revoke_where(now, |t| t.user_id == user_id))
    }

    async fn revoke_org_refresh_tokens(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.revoke_where(now, |t| t.organization_id == organization_id))
    }

    async fn revoke_user_org_refresh_tokens(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.revoke_where(now, |t| {
            t.user_id == user_id && t.organization_id == organization_id
        }))
    }

    async fn revoke_client_refresh_tokens(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.revoke_where(now, |t| t.client_id.as_deref() == Some(client_id)))
    }

    async fn insert_verification_token(&self, token: VerificationToken) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .verification_tokens
            .insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationToken>> {
        let mut state = self.state.write().await;
        match state.verification_tokens.get_mut(token_hash) {
            Some(token)
                if token.purpose == purpose
                    && token.consumed_at.is_none()
                    && token.expires_at > now =>
            {
                token.consumed_at = Some(now);
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn code(hash: &str) -> AuthorizationCode {
        AuthorizationCode::new(
            hash.to_string(),
            "abc123".to_string(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "http://localhost/callback".to_string(),
            "profile".to_string(),
            "challenge".to_string(),
            "S256".to_string(),
            10,
        )
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = InMemoryCredentialStore::new();
        store
            .create_user(User::new("a@example.com".into(), "h".into(), None))
            .await
            .unwrap();
        let err = store
            .create_user(User::new("a@example.com".into(), "h".into(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_consume_code_has_single_winner() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.insert_authorization_code(code("h1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.consume_authorization_code("h1", Utc::now()).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_rotate_refresh_token_once() {
        let store = InMemoryCredentialStore::new();
        let token = RefreshToken::new(
            "rt".into(),
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            "profile".into(),
            1,
        );
        store.insert_refresh_token(token).await.unwrap();

        assert!(store.rotate_refresh_token("rt", Utc::now()).await.unwrap().is_some());
        assert!(store.rotate_refresh_token("rt", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successor_cannot_join_revoked_family() {
        let store = InMemoryCredentialStore::new();
        let (user, org) = (Uuid::new_v4(), Uuid::new_v4());
        let first = RefreshToken::new("r1".into(), user, None, org, String::new(), 1);
        let family = first.family_id;
        store.insert_refresh_token(first).await.unwrap();

        // r1 is rotated away, then the family is revoked before r2 lands
        store.rotate_refresh_token("r1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(store.revoke_refresh_family(family, Utc::now()).await.unwrap(), 0);

        let second =
            RefreshToken::in_family(family, "r2".into(), user, None, org, String::new(), 1);
        let err = store.insert_refresh_token(second).await.unwrap_err();
        assert!(matches!(err, StoreError::FamilyRevoked(id) if id == family));
        assert!(store.find_refresh_token("r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_revocation_covers_family_mid_rotation() {
        let store = InMemoryCredentialStore::new();
        let (user, org) = (Uuid::new_v4(), Uuid::new_v4());
        let first = RefreshToken::new("r1".into(), user, None, org, String::new(), 1);
        let family = first.family_id;
        store.insert_refresh_token(first).await.unwrap();
        store.rotate_refresh_token("r1", Utc::now()).await.unwrap().unwrap();

        store.revoke_user_refresh_tokens(user, Utc::now()).await.unwrap();

        let second =
            RefreshToken::in_family(family, "r2".into(), user, None, org, String::new(), 1);
        assert!(store.insert_refresh_token(second).await.is_err());

        // other users and fresh families are unaffected
        let fresh = RefreshToken::new("r3".into(), user, None, org, String::new(), 1);
        store.insert_refresh_token(fresh).await.unwrap();
        let other = RefreshToken::new("r4".into(), Uuid::new_v4(), None, org, String::new(), 1);
        store.insert_refresh_token(other).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_login_locks_at_threshold() {
        let store = InMemoryCredentialStore::new();
        let user = store
            .create_user(User::new("a@example.com".into(), "h".into(), None))
            .await
            .unwrap();
        let until = Utc::now() + chrono::Duration::minutes(15);

        let first = store.record_failed_login(user.user_id, 2, until).await.unwrap();
        assert!(!first.locked);
        let second = store.record_failed_login(user.user_id, 2, until).await.unwrap();
        assert!(second.locked);

        let stored = store.get_user(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.locked_until, Some(until));
        assert_eq!(stored.failed_login_attempts, 0);
    }

    #[tokio::test]
    async fn test_store_rejects_cross_tenant_link() {
        let store = InMemoryCredentialStore::new();
        let perm = store
            .create_permission(Permission::custom(
                Uuid::new_v4(),
                "reports:export".into(),
                "reports".into(),
            ))
            .await
            .unwrap();
        let role = store
            .create_role(Role::custom(Uuid::new_v4(), "analyst".into()))
            .await
            .unwrap();

        let err = store
            .add_role_permission(role.role_id, perm.permission_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.list_role_permissions(role.role_id).await.unwrap().is_empty());
    }
}
