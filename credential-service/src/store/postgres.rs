//! PostgreSQL credential store.
//!
//! Single-use records are consumed with conditional `UPDATE ... RETURNING`
//! statements, so the database decides the one winner of a race. Tenant
//! isolation on `role_permissions` is also enforced by a trigger (see
//! `migrations/0001_credential_store.sql`). Refresh-token families get a row
//! of their own so revocation and rotation lock the same thing.

use super::{CredentialStore, FailedLogin, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::db;
use crate::models::{
    AuthorizationCode, ClientApplication, Membership, MembershipStatus, Organization, Permission,
    RefreshToken, Role, User, VerificationToken,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgQueryResult};
use sqlx::query::Query;
use sqlx::Postgres;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

fn map_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        let code = db_err.code();
        if matches!(code.as_deref(), Some(UNIQUE_VIOLATION) | Some(CHECK_VIOLATION)) {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Unexpected(anyhow!(e))
}

fn expect_row(result: PgQueryResult, what: impl Into<String>) -> StoreResult<()> {
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(what.into()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, run migrations and wrap the pool.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = db::create_pool(config)
            .await
            .map_err(|e| StoreError::Unexpected(anyhow!("failed to connect: {}", e)))?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| StoreError::Unexpected(anyhow!("migrations failed: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Marks the covered families revoked, then revokes their live tokens, in
    /// one transaction. Taking the family rows first serialises against
    /// `insert_refresh_token`.
    async fn revoke_families(&self, scope: FamilyScope, now: DateTime<Utc>) -> StoreResult<u64> {
        let predicate = scope.predicate();
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let families = format!(
            "UPDATE refresh_token_families SET revoked_at = $1 WHERE {} AND revoked_at IS NULL",
            predicate
        );
        scope
            .bind(sqlx::query(&families).bind(now))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        let tokens = format!(
            "UPDATE refresh_tokens SET revoked_at = $1 WHERE {} AND revoked_at IS NULL",
            predicate
        );
        let result = scope
            .bind(sqlx::query(&tokens).bind(now))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(result.rows_affected())
    }
}

/// Which refresh-token families a revocation covers. Both
/// `refresh_token_families` and `refresh_tokens` carry these columns.
enum FamilyScope {
    Family(Uuid),
    User(Uuid),
    Organization(Uuid),
    UserInOrganization(Uuid, Uuid),
    Client(String),
}

impl FamilyScope {
    /// `$1` is the revocation time.
    fn predicate(&self) -> &'static str {
        match self {
            FamilyScope::Family(_) => "family_id = $2",
            FamilyScope::User(_) => "user_id = $2",
            FamilyScope::Organization(_) => "organization_id = $2",
            FamilyScope::UserInOrganization(..) => "user_id = $2 AND organization_id = $3",
            FamilyScope::Client(_) => "client_id = $2",
        }
    }

    fn bind<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            FamilyScope::Family(id) | FamilyScope::User(id) | FamilyScope::Organization(id) => {
                query.bind(*id)
            }
            FamilyScope::UserInOrganization(user_id, organization_id) => {
                query.bind(*user_id).bind(*organization_id)
            }
            FamilyScope::Client(client_id) => query.bind(client_id.clone()),
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    // ==================== Users ====================

    async fn create_user(&self, user: User) -> StoreResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, display_name, status, email_verified,
                               is_superadmin, failed_login_attempts, locked_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.status)
        .bind(user.email_verified)
        .bind(user.is_superadmin)
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn update_user_password(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        expect_row(result, format!("user {}", user_id))
    }

    async fn update_user_status(&self, user_id: Uuid, status: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET status = $2, updated_at = NOW() WHERE user_id = $1")
                .bind(user_id)
                .bind(status)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        expect_row(result, format!("user {}", user_id))
    }

    async fn set_email_verified(&self, user_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        expect_row(result, format!("user {}", user_id))
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        locked_until: DateTime<Utc>,
    ) -> StoreResult<FailedLogin> {
        let row: Option<(i32, bool)> = sqlx::query_as(
            r#"
            UPDATE users
            SET failed_login_attempts = CASE WHEN failed_login_attempts + 1 >= $2
                                             THEN 0 ELSE failed_login_attempts + 1 END,
                locked_until = CASE WHEN failed_login_attempts + 1 >= $2
                                    THEN $3 ELSE locked_until END,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING failed_login_attempts, (locked_until IS NOT DISTINCT FROM $3)
            "#,
        )
        .bind(user_id)
        .bind(max_attempts)
        .bind(locked_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        let (attempts, locked) =
            row.ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        Ok(FailedLogin {
            attempts: if locked { max_attempts } else { attempts },
            locked,
        })
    }

    async fn reset_failed_logins(&self, user_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        expect_row(result, format!("user {}", user_id))
    }

    // ==================== Organizations & memberships ====================

    async fn create_organization(&self, org: Organization) -> StoreResult<Organization> {
        sqlx::query(
            r#"
            INSERT INTO organizations (organization_id, name, slug, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(org.organization_id)
        .bind(&org.name)
        .bind(&org.slug)
        .bind(org.enabled)
        .bind(org.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(org)
    }

    async fn get_organization(&self, organization_id: Uuid) -> StoreResult<Option<Organization>> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn create_membership(&self, membership: Membership) -> StoreResult<Membership> {
        sqlx::query(
            r#"
            INSERT INTO memberships (membership_id, user_id, organization_id, role_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(membership.membership_id)
        .bind(membership.user_id)
        .bind(membership.organization_id)
        .bind(membership.role_id)
        .bind(&membership.status)
        .bind(membership.created_at)
        .bind(membership.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(membership)
    }

    async fn find_active_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> StoreResult<Option<Membership>> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE user_id = $1 AND organization_id = $2 AND status = $3",
        )
        .bind(user_id)
        .bind(organization_id)
        .bind(MembershipStatus::Active.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn update_membership_role(&self, membership_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE memberships SET role_id = $2, updated_at = NOW() WHERE membership_id = $1",
        )
        .bind(membership_id)
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        expect_row(result, format!("membership {}", membership_id))
    }

    async fn update_membership_status(
        &self,
        membership_id: Uuid,
        status: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE memberships SET status = $2, updated_at = NOW() WHERE membership_id = $1",
        )
        .bind(membership_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        expect_row(result, format!("membership {}", membership_id))
    }

    async fn count_active_memberships_for_role(&self, role_id: Uuid) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE role_id = $1 AND status = $2")
                .bind(role_id)
                .bind(MembershipStatus::Active.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(count)
    }

    // ==================== Roles & permissions ====================

    async fn create_role(&self, role: Role) -> StoreResult<Role> {
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, organization_id, name, is_system, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(role.role_id)
        .bind(role.organization_id)
        .bind(&role.name)
        .bind(role.is_system)
        .bind(role.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(role)
    }

    async fn get_role(&self, role_id: Uuid) -> StoreResult<Option<Role>> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_system_role(&self, name: &str) -> StoreResult<Option<Role>> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE organization_id IS NULL AND name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_roles(&self, organization_id: Uuid) -> StoreResult<Vec<Role>> {
        sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE organization_id IS NULL OR organization_id = $1 ORDER BY name",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn rename_role(&self, role_id: Uuid, name: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE roles SET name = $2 WHERE role_id = $1")
            .bind(role_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        expect_row(result, format!("role {}", role_id))
    }

    async fn delete_role(&self, role_id: Uuid) -> StoreResult<()> {
        // role_permissions rows cascade
        let result = sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        expect_row(result, format!("role {}", role_id))
    }

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        sqlx::query(
            r#"
            INSERT INTO permissions (permission_id, organization_id, name, category, is_system, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(permission.permission_id)
        .bind(permission.organization_id)
        .bind(&permission.name)
        .bind(&permission.category)
        .bind(permission.is_system)
        .bind(permission.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(permission)
    }

    async fn get_permission(&self, permission_id: Uuid) -> StoreResult<Option<Permission>> {
        sqlx::query_as::<_, Permission>("SELECT * FROM permissions WHERE permission_id = $1")
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_permission_by_name(
        &self,
        organization_id: Option<Uuid>,
        name: &str,
    ) -> StoreResult<Option<Permission>> {
        sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE organization_id IS NOT DISTINCT FROM $1 AND name = $2",
        )
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn list_permissions(&self, organization_id: Uuid) -> StoreResult<Vec<Permission>> {
        sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE organization_id IS NULL OR organization_id = $1 ORDER BY name",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn delete_permission(&self, permission_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let roles: Vec<(Uuid,)> =
            sqlx::query_as("DELETE FROM role_permissions WHERE permission_id = $1 RETURNING role_id")
                .bind(permission_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(map_err)?;

        let result = sqlx::query("DELETE FROM permissions WHERE permission_id = $1")
            .bind(permission_id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        expect_row(result, format!("permission {}", permission_id))?;

        tx.commit().await.map_err(map_err)?;
        Ok(roles.into_iter().map(|(id,)| id).collect())
    }

    async fn add_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn remove_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.* FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.permission_id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    // ==================== Client applications ====================

    async fn create_client(&self, client: ClientApplication) -> StoreResult<ClientApplication> {
        sqlx::query(
            r#"
            INSERT INTO client_applications (id, client_id, organization_id, name, client_type,
                client_secret_hash, previous_client_secret_hash, previous_secret_expiry,
                redirect_uris, allowed_scopes, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(client.id)
        .bind(&client.client_id)
        .bind(client.organization_id)
        .bind(&client.name)
        .bind(&client.client_type)
        .bind(&client.client_secret_hash)
        .bind(&client.previous_client_secret_hash)
        .bind(client.previous_secret_expiry)
        .bind(&client.redirect_uris)
        .bind(&client.allowed_scopes)
        .bind(client.enabled)
        .bind(client.created_at)
        .bind(client.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(client)
    }

    async fn get_client(&self, client_id: &str) -> StoreResult<Option<ClientApplication>> {
        sqlx::query_as::<_, ClientApplication>(
            "SELECT * FROM client_applications WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn update_client_secret(
        &self,
        client_id: &str,
        secret_hash: &str,
        previous_hash: Option<&str>,
        previous_expiry: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE client_applications
            SET client_secret_hash = $2, previous_client_secret_hash = $3,
                previous_secret_expiry = $4, updated_at = NOW()
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .bind(secret_hash)
        .bind(previous_hash)
        .bind(previous_expiry)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        expect_row(result, format!("client {}", client_id))
    }

    async fn set_client_enabled(&self, client_id: &str, enabled: bool) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE client_applications SET enabled = $2, updated_at = NOW() WHERE client_id = $1",
        )
        .bind(client_id)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        expect_row(result, format!("client {}", client_id))
    }

    // ==================== Authorization codes ====================

    async fn insert_authorization_code(&self, code: AuthorizationCode) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO authorization_codes (code_hash, client_id, user_id, organization_id,
                redirect_uri, scope, code_challenge, code_challenge_method, expires_at, used,
                used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&code.code_hash)
        .bind(&code.client_id)
        .bind(code.user_id)
        .bind(code.organization_id)
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(code.expires_at)
        .bind(code.used)
        .bind(code.used_at)
        .bind(code.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code_hash: &str,
    ) -> StoreResult<Option<AuthorizationCode>> {
        sqlx::query_as::<_, AuthorizationCode>(
            "SELECT * FROM authorization_codes WHERE code_hash = $1",
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AuthorizationCode>> {
        sqlx::query_as::<_, AuthorizationCode>(
            r#"
            UPDATE authorization_codes SET used = TRUE, used_at = $2
            WHERE code_hash = $1 AND used = FALSE
            RETURNING *
            "#,
        )
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: RefreshToken) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        // Creates the family or locks its live row until commit. A concurrent
        // revocation either waits for this insert and then sees the token, or
        // wins and leaves no row to return here.
        let live: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO refresh_token_families (family_id, user_id, client_id, organization_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (family_id) DO UPDATE SET rotated_at = EXCLUDED.created_at
            WHERE refresh_token_families.revoked_at IS NULL
            RETURNING family_id
            "#,
        )
        .bind(token.family_id)
        .bind(token.user_id)
        .bind(&token.client_id)
        .bind(token.organization_id)
        .bind(token.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;

        if live.is_none() {
            return Err(StoreError::FamilyRevoked(token.family_id));
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, token_hash, user_id, client_id, organization_id,
                family_id, scope, expires_at, revoked_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(&token.client_id)
        .bind(token.organization_id)
        .bind(token.family_id)
        .bind(&token.scope)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>> {
        sqlx::query_as::<_, RefreshToken>(
            r#"
            UPDATE refresh_tokens SET revoked_at = $2
            WHERE token_hash = $1 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn revoke_refresh_family(&self, family_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        self.revoke_families(FamilyScope::Family(family_id), now)
            .await
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.revoke_families(FamilyScope::User(user_id), now).await
    }

    async fn revoke_org_refresh_tokens(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.revoke_families(FamilyScope::Organization(organization_id), now)
            .await
    }

    async fn revoke_user_org_refresh_tokens(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.revoke_families(FamilyScope::UserInOrganization(user_id, organization_id), now)
            .await
    }

    async fn revoke_client_refresh_tokens(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.revoke_families(FamilyScope::Client(client_id.to_string()), now)
            .await
    }

    // ==================== Verification tokens ====================

    async fn insert_verification_token(&self, token: VerificationToken) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (id, token_hash, user_id, purpose, expires_at, consumed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(&token.purpose)
        .bind(token.expires_at)
        .bind(token.consumed_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationToken>> {
        sqlx::query_as::<_, VerificationToken>(
            r#"
            UPDATE verification_tokens SET consumed_at = $3
            WHERE token_hash = $1 AND purpose = $2 AND consumed_at IS NULL AND expires_at > $3
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(purpose)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn health_check(&self) -> StoreResult<()> {
        db::health_check(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Database health check failed");
            map_err(e)
        })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
