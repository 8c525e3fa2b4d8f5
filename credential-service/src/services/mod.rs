//! Services layer for the credential service.
//!
//! Token issuance and validation, the OAuth2 authorization-code flow,
//! organization-scoped RBAC, revocation and first-party authentication.

pub mod auth;
pub mod clients;
mod email;
pub mod error;
pub mod jwt;
pub mod oauth2;
pub mod organization;
pub mod password;
pub mod rate_limit;
pub mod rbac;
pub mod redis;
pub mod revocation;

pub use auth::{AuthService, IntrospectResponse};
pub use clients::{ClientService, NewClient, RegisteredClient, RotatedSecret};
pub use email::{EmailProvider, EmailService, MockEmailService, SentEmail};
pub use error::{OAuthError, ServiceError};
pub use jwt::{AccessGrant, AccessTokenClaims, JwkSet, TokenPair, TokenService};
pub use oauth2::{AuthorizationGrant, AuthorizeRequest, ExchangeRequest, OAuth2Server, RefreshRequest};
pub use organization::OrganizationService;
pub use password::PasswordHasher;
pub use rate_limit::RateLimiter;
pub use rbac::{RbacEngine, SystemCatalog};
pub use redis::{KeyValueStore, MemoryKeyValueStore, RedisService};
pub use revocation::RevocationStore;
