//! Role and permission models.
//!
//! `organization_id = None` marks a system entity: defined once, shared by
//! every tenant, immutable through tenant-facing operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn system(name: String) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            organization_id: None,
            name,
            is_system: true,
            created_at: Utc::now(),
        }
    }

    pub fn custom(organization_id: Uuid, name: String) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            organization_id: Some(organization_id),
            name,
            is_system: false,
            created_at: Utc::now(),
        }
    }

    /// Whether members of `organization_id` may be granted this role.
    pub fn usable_in(&self, organization_id: Uuid) -> bool {
        self.is_system || self.organization_id == Some(organization_id)
    }
}

/// Permission entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub permission_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn system(name: String, category: String) -> Self {
        Self {
            permission_id: Uuid::new_v4(),
            organization_id: None,
            name,
            category,
            is_system: true,
            created_at: Utc::now(),
        }
    }

    pub fn custom(organization_id: Uuid, name: String, category: String) -> Self {
        Self {
            permission_id: Uuid::new_v4(),
            organization_id: Some(organization_id),
            name,
            category,
            is_system: false,
            created_at: Utc::now(),
        }
    }

    /// The tenant-isolation rule for role/permission links: a system
    /// permission links to any role, a custom one only to a role of the same
    /// organization.
    pub fn assignable_to(&self, role: &Role) -> bool {
        self.is_system
            || (self.organization_id.is_some() && self.organization_id == role.organization_id)
    }
}

/// Role permission mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromRow)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_permission_only_assignable_within_its_org() {
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let perm = Permission::custom(org_a, "reports:export".to_string(), "reports".to_string());

        assert!(perm.assignable_to(&Role::custom(org_a, "analyst".to_string())));
        assert!(!perm.assignable_to(&Role::custom(org_b, "analyst".to_string())));
        assert!(!perm.assignable_to(&Role::system("auditor".to_string())));
    }

    #[test]
    fn test_system_permission_assignable_everywhere() {
        let perm = Permission::system("org:read".to_string(), "org".to_string());

        assert!(perm.assignable_to(&Role::custom(Uuid::new_v4(), "x".to_string())));
        assert!(perm.assignable_to(&Role::system("admin".to_string())));
    }

    #[test]
    fn test_role_usable_in() {
        let org = Uuid::new_v4();
        assert!(Role::system("member".to_string()).usable_in(org));
        assert!(Role::custom(org, "ops".to_string()).usable_in(org));
        assert!(!Role::custom(Uuid::new_v4(), "ops".to_string()).usable_in(org));
    }
}
