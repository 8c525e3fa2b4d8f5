use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::services::NewClient;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 200, message = "Organization name is required"))]
    pub name: String,

    #[validate(length(min = 1, max = 63, message = "Slug must be 1-63 characters"))]
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ChangeMemberRoleRequest {
    pub role_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RoleRequest {
    #[validate(length(min = 1, max = 100, message = "Role name must be 1-100 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 100, message = "Permission name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 50, message = "Category must be 1-50 characters"))]
    pub category: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClientRequest {
    /// Generated when absent.
    pub client_id: Option<String>,

    #[validate(length(min = 1, message = "Client name is required"))]
    pub name: String,

    #[validate(length(min = 1, message = "At least one redirect URI is required"))]
    pub redirect_uris: Vec<String>,

    #[validate(length(min = 1, message = "At least one scope is required"))]
    pub allowed_scopes: Vec<String>,

    #[serde(default)]
    pub confidential: bool,
}

impl From<CreateClientRequest> for NewClient {
    fn from(req: CreateClientRequest) -> Self {
        NewClient {
            client_id: req.client_id,
            name: req.name,
            redirect_uris: req.redirect_uris,
            allowed_scopes: req.allowed_scopes,
            confidential: req.confidential,
        }
    }
}
