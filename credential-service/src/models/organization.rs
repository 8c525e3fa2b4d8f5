use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A tenant boundary. Owns memberships, custom roles and permissions, and
/// client applications.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: String, slug: String) -> Self {
        Self {
            organization_id: Uuid::new_v4(),
            name,
            slug,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Membership state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Invited,
    Removed,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Invited => "invited",
            MembershipStatus::Removed => "removed",
        }
    }
}

/// Links a user to an organization with exactly one role.
///
/// At most one `active` membership exists per (user, organization).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub membership_id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(user_id: Uuid, organization_id: Uuid, role_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            membership_id: Uuid::new_v4(),
            user_id,
            organization_id,
            role_id,
            status: MembershipStatus::Active.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active.as_str()
    }
}
