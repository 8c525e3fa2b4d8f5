//! Organization-scoped roles and permissions.
//!
//! System roles and permissions have no organization and are shared by every
//! tenant; nothing tenant-facing may change them. Custom roles and
//! permissions belong to exactly one organization. A custom permission can
//! only ever be linked to a role of its own organization.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::models::{Permission, Role};
use crate::services::error::ServiceError;
use crate::store::{CredentialStore, StoreError};

/// Names of the built-in system permissions.
pub mod permissions {
    pub const ORG_READ: &str = "org:read";
    pub const ORG_MANAGE: &str = "org:manage";
    pub const MEMBERS_READ: &str = "members:read";
    pub const MEMBERS_MANAGE: &str = "members:manage";
    pub const ROLES_READ: &str = "roles:read";
    pub const ROLES_MANAGE: &str = "roles:manage";
    pub const CLIENTS_MANAGE: &str = "clients:manage";
    pub const SESSIONS_REVOKE: &str = "sessions:revoke";
}

/// Names of the built-in system roles.
pub mod roles {
    pub const OWNER: &str = "owner";
    pub const ADMIN: &str = "admin";
    pub const MEMBER: &str = "member";
}

/// The built-in catalog seeded by [`RbacEngine::ensure_system_catalog`].
pub struct SystemCatalog;

impl SystemCatalog {
    /// `(name, category)`
    pub const PERMISSIONS: &'static [(&'static str, &'static str)] = &[
        (permissions::ORG_READ, "organization"),
        (permissions::ORG_MANAGE, "organization"),
        (permissions::MEMBERS_READ, "members"),
        (permissions::MEMBERS_MANAGE, "members"),
        (permissions::ROLES_READ, "roles"),
        (permissions::ROLES_MANAGE, "roles"),
        (permissions::CLIENTS_MANAGE, "clients"),
        (permissions::SESSIONS_REVOKE, "sessions"),
    ];

    const READ_ONLY: &'static [&'static str] = &[
        permissions::ORG_READ,
        permissions::MEMBERS_READ,
        permissions::ROLES_READ,
    ];

    /// Permission names granted to a system role.
    pub fn role_permissions(role: &str) -> Vec<&'static str> {
        match role {
            roles::OWNER | roles::ADMIN => Self::PERMISSIONS.iter().map(|(name, _)| *name).collect(),
            roles::MEMBER => Self::READ_ONLY.to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn roles() -> [&'static str; 3] {
        [roles::OWNER, roles::ADMIN, roles::MEMBER]
    }
}

const MAX_NAME_LEN: usize = 64;

fn validate_name(kind: &str, name: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation(format!("{} name is required", kind)));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "{} name must be at most {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

pub struct RbacEngine {
    store: Arc<dyn CredentialStore>,
    /// Permission names per role. Entries are dropped on any link change.
    cache: DashMap<Uuid, Arc<HashSet<String>>>,
    /// Bumped on every invalidation so a load that raced a mutation does not
    /// repopulate the cache with the old set.
    generation: AtomicU64,
}

impl RbacEngine {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    // ---------------------------------------------------------------------
    // Decisions
    // ---------------------------------------------------------------------

    /// Inactive users and disabled organizations are denied everything.
    /// Superadmins are allowed everything else.
    pub async fn check_permission(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        organization_id: Uuid,
        permission: &str,
    ) -> Result<bool, ServiceError> {
        let Some(user) = ctx.run(self.store.get_user(user_id)).await? else {
            return Ok(false);
        };
        if !user.is_active() {
            return Ok(false);
        }

        match ctx.run(self.store.get_organization(organization_id)).await? {
            Some(org) if org.enabled => {}
            _ => return Ok(false),
        }

        if user.is_superadmin {
            return Ok(true);
        }

        let Some(membership) = ctx
            .run(self.store.find_active_membership(user_id, organization_id))
            .await?
        else {
            return Ok(false);
        };

        let granted = self.role_permission_names(ctx, membership.role_id).await?;
        Ok(granted.contains(permission))
    }

    pub async fn require_permission(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        organization_id: Uuid,
        permission: &str,
    ) -> Result<(), ServiceError> {
        if self
            .check_permission(ctx, user_id, organization_id, permission)
            .await?
        {
            return Ok(());
        }

        tracing::warn!(
            user_id = %user_id,
            organization_id = %organization_id,
            permission = %permission,
            correlation_id = %ctx.correlation_id,
            "Permission denied"
        );
        Err(ServiceError::PermissionDenied(permission.to_string()))
    }

    /// Sorted permission names the user holds in the organization.
    pub async fn effective_permissions(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<String>, ServiceError> {
        let user = ctx
            .run(self.store.get_user(user_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("user".to_string()))?;

        let mut names: Vec<String> = if user.is_superadmin {
            ctx.run(self.store.list_permissions(organization_id))
                .await?
                .into_iter()
                .map(|p| p.name)
                .collect()
        } else {
            match ctx
                .run(self.store.find_active_membership(user_id, organization_id))
                .await?
            {
                Some(membership) => self
                    .role_permission_names(ctx, membership.role_id)
                    .await?
                    .iter()
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Role names carried in the user's access tokens for the organization.
    pub async fn role_names(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        organization_id: Uuid,
        is_superadmin: bool,
    ) -> Result<Vec<String>, ServiceError> {
        let membership = ctx
            .run(self.store.find_active_membership(user_id, organization_id))
            .await?;

        let mut names = Vec::new();
        if let Some(membership) = membership {
            if let Some(role) = ctx.run(self.store.get_role(membership.role_id)).await? {
                names.push(role.name);
            }
        }
        if is_superadmin {
            names.push("superadmin".to_string());
        }
        Ok(names)
    }

    // ---------------------------------------------------------------------
    // Role-permission links
    // ---------------------------------------------------------------------

    /// Link a permission to a custom role of the acting organization.
    pub async fn assign_permission(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), ServiceError> {
        let role = self.tenant_role(ctx, role_id).await?;
        let permission = ctx
            .run(self.store.get_permission(permission_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("permission".to_string()))?;

        if let Some(permission_org) = permission.organization_id {
            if !permission.assignable_to(&role) {
                tracing::warn!(
                    role_id = %role.role_id,
                    permission_id = %permission.permission_id,
                    permission_org = %permission_org,
                    correlation_id = %ctx.correlation_id,
                    "Cross-tenant permission assignment rejected"
                );
                return Err(ServiceError::CrossTenantAssignment {
                    permission_org,
                    role_org: role.organization_id,
                });
            }
        }

        ctx.run(async {
            self.store
                .add_role_permission(role.role_id, permission.permission_id)
                .await
                .map_err(|e| match e {
                    // store-level tenant guard
                    StoreError::Conflict(_) => ServiceError::CrossTenantAssignment {
                        permission_org: permission.organization_id.unwrap_or_default(),
                        role_org: role.organization_id,
                    },
                    other => other.into(),
                })
        })
        .await?;

        self.invalidate(role.role_id);
        tracing::info!(
            role_id = %role.role_id,
            permission = %permission.name,
            correlation_id = %ctx.correlation_id,
            "Permission assigned to role"
        );
        Ok(())
    }

    /// Returns whether a link existed.
    pub async fn revoke_permission(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let role = self.tenant_role(ctx, role_id).await?;
        let permission = ctx
            .run(self.store.get_permission(permission_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("permission".to_string()))?;

        if !permission.is_system && permission.organization_id != role.organization_id {
            return Err(ServiceError::ForeignTenant);
        }

        let removed = ctx
            .run(
                self.store
                    .remove_role_permission(role.role_id, permission.permission_id),
            )
            .await?;

        self.invalidate(role.role_id);
        if removed {
            tracing::info!(
                role_id = %role.role_id,
                permission = %permission.name,
                correlation_id = %ctx.correlation_id,
                "Permission revoked from role"
            );
        }
        Ok(removed)
    }

    pub async fn list_role_permissions(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        let organization_id = ctx.require_organization()?;
        let role = self.resolve_role_for_org(ctx, role_id, organization_id).await?;
        ctx.run(self.store.list_role_permissions(role.role_id)).await
    }

    // ---------------------------------------------------------------------
    // Roles
    // ---------------------------------------------------------------------

    /// Create a global role and link the named system permissions to it.
    pub async fn create_system_role(
        &self,
        ctx: &RequestContext,
        name: &str,
        permission_names: &[&str],
    ) -> Result<Role, ServiceError> {
        let name = validate_name("role", name)?;
        if ctx.run(self.store.find_system_role(&name)).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "system role {} already exists",
                name
            )));
        }

        let role = ctx.run(self.store.create_role(Role::system(name))).await?;
        self.link_system_permissions(ctx, &role, permission_names)
            .await?;

        tracing::info!(role = %role.name, "System role created");
        Ok(role)
    }

    /// Custom roles start with no permissions.
    pub async fn create_custom_role(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Role, ServiceError> {
        let organization_id = ctx.require_organization()?;
        let name = validate_name("role", name)?;
        self.ensure_role_name_free(ctx, organization_id, &name)
            .await?;

        let role = ctx
            .run(self.store.create_role(Role::custom(organization_id, name)))
            .await?;

        tracing::info!(
            role_id = %role.role_id,
            organization_id = %organization_id,
            correlation_id = %ctx.correlation_id,
            "Custom role created"
        );
        Ok(role)
    }

    pub async fn update_role(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
        name: &str,
    ) -> Result<Role, ServiceError> {
        let mut role = self.tenant_role(ctx, role_id).await?;
        let name = validate_name("role", name)?;
        if name == role.name {
            return Ok(role);
        }
        if let Some(organization_id) = role.organization_id {
            self.ensure_role_name_free(ctx, organization_id, &name)
                .await?;
        }

        ctx.run(self.store.rename_role(role.role_id, &name)).await?;
        role.name = name;
        Ok(role)
    }

    /// Fails with `RoleInUse` while any active membership holds the role.
    pub async fn delete_role(&self, ctx: &RequestContext, role_id: Uuid) -> Result<(), ServiceError> {
        let role = self.tenant_role(ctx, role_id).await?;

        let holders = ctx
            .run(self.store.count_active_memberships_for_role(role.role_id))
            .await?;
        if holders > 0 {
            return Err(ServiceError::RoleInUse(role.role_id));
        }

        ctx.run(self.store.delete_role(role.role_id)).await?;
        self.invalidate(role.role_id);

        tracing::info!(
            role_id = %role.role_id,
            correlation_id = %ctx.correlation_id,
            "Custom role deleted"
        );
        Ok(())
    }

    pub async fn list_roles(&self, ctx: &RequestContext) -> Result<Vec<Role>, ServiceError> {
        let organization_id = ctx.require_organization()?;
        ctx.run(self.store.list_roles(organization_id)).await
    }

    /// A system role, or a custom role of `organization_id`.
    pub async fn resolve_role_for_org(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Role, ServiceError> {
        let role = ctx
            .run(self.store.get_role(role_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("role".to_string()))?;

        if !role.usable_in(organization_id) {
            return Err(ServiceError::ForeignTenant);
        }
        Ok(role)
    }

    pub async fn system_role(&self, ctx: &RequestContext, name: &str) -> Result<Role, ServiceError> {
        ctx.run(self.store.find_system_role(name))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("system role {}", name)))
    }

    // ---------------------------------------------------------------------
    // Permissions
    // ---------------------------------------------------------------------

    /// Custom permission names share the scope namespace, so they may not
    /// contain whitespace or shadow a system permission.
    pub async fn create_custom_permission(
        &self,
        ctx: &RequestContext,
        name: &str,
        category: &str,
    ) -> Result<Permission, ServiceError> {
        let organization_id = ctx.require_organization()?;
        let name = validate_name("permission", name)?;
        if name.chars().any(char::is_whitespace) {
            return Err(ServiceError::Validation(
                "permission name must not contain whitespace".to_string(),
            ));
        }
        let category = validate_name("category", category)?;

        if ctx
            .run(self.store.find_permission_by_name(None, &name))
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "{} is a system permission name",
                name
            )));
        }

        let permission = ctx
            .run(
                self.store
                    .create_permission(Permission::custom(organization_id, name, category)),
            )
            .await?;

        tracing::info!(
            permission = %permission.name,
            organization_id = %organization_id,
            correlation_id = %ctx.correlation_id,
            "Custom permission created"
        );
        Ok(permission)
    }

    pub async fn delete_permission(
        &self,
        ctx: &RequestContext,
        permission_id: Uuid,
    ) -> Result<(), ServiceError> {
        let organization_id = ctx.require_organization()?;
        let permission = ctx
            .run(self.store.get_permission(permission_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("permission".to_string()))?;

        if permission.is_system {
            return Err(ServiceError::SystemEntityImmutable(format!(
                "permission {}",
                permission.name
            )));
        }
        if permission.organization_id != Some(organization_id) {
            return Err(ServiceError::ForeignTenant);
        }

        let affected = ctx
            .run(self.store.delete_permission(permission.permission_id))
            .await?;
        for role_id in &affected {
            self.invalidate(*role_id);
        }

        tracing::info!(
            permission = %permission.name,
            roles_affected = affected.len(),
            correlation_id = %ctx.correlation_id,
            "Custom permission deleted"
        );
        Ok(())
    }

    pub async fn list_permissions(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<Permission>, ServiceError> {
        let organization_id = ctx.require_organization()?;
        ctx.run(self.store.list_permissions(organization_id)).await
    }

    // ---------------------------------------------------------------------
    // Catalog
    // ---------------------------------------------------------------------

    /// Create any missing system permission, system role or link of the
    /// built-in catalog. Safe to run concurrently and repeatedly.
    pub async fn ensure_system_catalog(&self, ctx: &RequestContext) -> Result<(), ServiceError> {
        for (name, category) in SystemCatalog::PERMISSIONS {
            if ctx
                .run(self.store.find_permission_by_name(None, name))
                .await?
                .is_some()
            {
                continue;
            }
            match ctx
                .run(async {
                    self.store
                        .create_permission(Permission::system(
                            name.to_string(),
                            category.to_string(),
                        ))
                        .await
                })
                .await
            {
                Ok(_) | Err(ServiceError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        for role_name in SystemCatalog::roles() {
            let role = match ctx.run(self.store.find_system_role(role_name)).await? {
                Some(role) => role,
                None => match ctx
                    .run(self.store.create_role(Role::system(role_name.to_string())))
                    .await
                {
                    Ok(role) => role,
                    Err(ServiceError::Conflict(_)) => self.system_role(ctx, role_name).await?,
                    Err(e) => return Err(e),
                },
            };
            self.link_system_permissions(ctx, &role, &SystemCatalog::role_permissions(role_name))
                .await?;
        }

        tracing::info!("System role catalog ensured");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // internals
    // ---------------------------------------------------------------------

    async fn link_system_permissions(
        &self,
        ctx: &RequestContext,
        role: &Role,
        permission_names: &[&str],
    ) -> Result<(), ServiceError> {
        for name in permission_names {
            let permission = ctx
                .run(self.store.find_permission_by_name(None, name))
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("system permission {}", name)))?;
            ctx.run(
                self.store
                    .add_role_permission(role.role_id, permission.permission_id),
            )
            .await?;
        }
        self.invalidate(role.role_id);
        Ok(())
    }

    /// A custom role of the acting organization. System roles and other
    /// tenants' roles are refused.
    async fn tenant_role(&self, ctx: &RequestContext, role_id: Uuid) -> Result<Role, ServiceError> {
        let organization_id = ctx.require_organization()?;
        let role = ctx
            .run(self.store.get_role(role_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("role".to_string()))?;

        if role.is_system {
            return Err(ServiceError::SystemEntityImmutable(format!(
                "role {}",
                role.name
            )));
        }
        if role.organization_id != Some(organization_id) {
            return Err(ServiceError::ForeignTenant);
        }
        Ok(role)
    }

    async fn ensure_role_name_free(
        &self,
        ctx: &RequestContext,
        organization_id: Uuid,
        name: &str,
    ) -> Result<(), ServiceError> {
        let taken = ctx
            .run(self.store.list_roles(organization_id))
            .await?
            .iter()
            .any(|r| r.name == name);
        if taken {
            return Err(ServiceError::Conflict(format!("role {} already exists", name)));
        }
        Ok(())
    }

    async fn role_permission_names(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
    ) -> Result<Arc<HashSet<String>>, ServiceError> {
        if let Some(hit) = self.cache.get(&role_id) {
            return Ok(hit.clone());
        }

        let generation = self.generation.load(Ordering::Acquire);
        let loaded: HashSet<String> = ctx
            .run(self.store.list_role_permissions(role_id))
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();
        let loaded = Arc::new(loaded);

        if let Entry::Vacant(slot) = self.cache.entry(role_id) {
            if self.generation.load(Ordering::Acquire) == generation {
                slot.insert(loaded.clone());
            }
        }
        Ok(loaded)
    }

    fn invalidate(&self, role_id: Uuid) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.remove(&role_id);
    }
}
