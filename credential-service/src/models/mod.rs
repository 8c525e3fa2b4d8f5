pub mod authorization_code;
pub mod client;
pub mod organization;
pub mod refresh_token;
pub mod role;
pub mod user;
pub mod verification_token;

pub use authorization_code::AuthorizationCode;
pub use client::{ClientApplication, ClientType};
pub use organization::{Membership, MembershipStatus, Organization};
pub use refresh_token::RefreshToken;
pub use role::{Permission, Role, RolePermission};
pub use user::{SanitizedUser, User, UserStatus};
pub use verification_token::{TokenPurpose, VerificationToken};
