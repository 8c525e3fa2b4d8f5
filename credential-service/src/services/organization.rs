use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::models::{Membership, MembershipStatus, Organization};
use crate::services::error::ServiceError;
use crate::services::rbac::{roles, RbacEngine};
use crate::services::revocation::RevocationStore;
use crate::store::CredentialStore;
use crate::utils::validation::is_valid_slug;

/// Organizations and their memberships. Callers are expected to have passed
/// the permission check for the acting organization already.
pub struct OrganizationService {
    store: Arc<dyn CredentialStore>,
    rbac: Arc<RbacEngine>,
    revocation: Arc<RevocationStore>,
}

impl OrganizationService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        rbac: Arc<RbacEngine>,
        revocation: Arc<RevocationStore>,
    ) -> Self {
        Self {
            store,
            rbac,
            revocation,
        }
    }

    /// Create an organization owned by the calling user.
    pub async fn create_organization(
        &self,
        ctx: &RequestContext,
        name: &str,
        slug: &str,
    ) -> Result<Organization, ServiceError> {
        let owner_id = ctx.require_user()?;

        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("organization name is required".to_string()));
        }
        if !is_valid_slug(slug) {
            return Err(ServiceError::Validation(format!("invalid slug: {}", slug)));
        }

        let owner_role = self.rbac.system_role(ctx, roles::OWNER).await?;
        let org = ctx
            .run(self.store.create_organization(Organization::new(
                name.to_string(),
                slug.to_string(),
            )))
            .await?;
        ctx.run(self.store.create_membership(Membership::new(
            owner_id,
            org.organization_id,
            owner_role.role_id,
        )))
        .await?;

        tracing::info!(
            organization_id = %org.organization_id,
            owner_id = %owner_id,
            "Organization created"
        );
        Ok(org)
    }

    pub async fn add_member(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<Membership, ServiceError> {
        let organization_id = ctx.require_organization()?;
        let role = self
            .rbac
            .resolve_role_for_org(ctx, role_id, organization_id)
            .await?;

        if ctx.run(self.store.get_user(user_id)).await?.is_none() {
            return Err(ServiceError::NotFound("user".to_string()));
        }

        let membership = ctx
            .run(self.store.create_membership(Membership::new(
                user_id,
                organization_id,
                role.role_id,
            )))
            .await?;

        tracing::info!(
            user_id = %user_id,
            organization_id = %organization_id,
            role = %role.name,
            "Member added"
        );
        Ok(membership)
    }

    /// Tokens issued before the change carry the old roles, so they are
    /// revoked for this organization.
    pub async fn change_member_role(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<Membership, ServiceError> {
        let organization_id = ctx.require_organization()?;
        let role = self
            .rbac
            .resolve_role_for_org(ctx, role_id, organization_id)
            .await?;
        let mut membership = self.active_membership(ctx, user_id, organization_id).await?;

        if membership.role_id == role.role_id {
            return Ok(membership);
        }

        ctx.run(self.store.update_membership_role(membership.membership_id, role.role_id))
            .await?;
        self.revocation
            .revoke_user_in_org(ctx, user_id, organization_id)
            .await?;

        tracing::info!(
            user_id = %user_id,
            organization_id = %organization_id,
            role = %role.name,
            "Member role changed"
        );
        membership.role_id = role.role_id;
        Ok(membership)
    }

    pub async fn remove_member(&self, ctx: &RequestContext, user_id: Uuid) -> Result<(), ServiceError> {
        let organization_id = ctx.require_organization()?;
        let membership = self.active_membership(ctx, user_id, organization_id).await?;

        ctx.run(self.store.update_membership_status(
            membership.membership_id,
            MembershipStatus::Removed.as_str(),
        ))
        .await?;
        let revoked = self
            .revocation
            .revoke_user_in_org(ctx, user_id, organization_id)
            .await?;

        tracing::info!(
            user_id = %user_id,
            organization_id = %organization_id,
            refresh_tokens_revoked = revoked,
            "Member removed"
        );
        Ok(())
    }

    async fn active_membership(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Membership, ServiceError> {
        ctx.run(self.store.find_active_membership(user_id, organization_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("membership".to_string()))
    }
}
