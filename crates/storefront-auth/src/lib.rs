//! Storefront Credentials and Authorization
//!
//! This crate issues, validates and rotates the signed session
//! credentials of the storefront API and provides the bitmask
//! role check used by route guards.

pub mod claims;
pub mod config;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod rbac;
pub mod session;
pub mod store;

pub use claims::{TokenClaims, TokenClass, UserClaims};
pub use config::{AuthConfig, RoleConfig};
pub use error::AuthError;
pub use jwt::{SigningKeys, TokenFactory, TokenValidator};
pub use middleware::{
    AuthGuard, AuthUser, RequiredRoles, admin_token_middleware, api_key_middleware,
    auth_middleware, require_path_user, require_roles,
};
pub use rbac::{RoleAuthorizer, RoleSet, authorize, role_mask};
pub use session::{Passport, SessionService, SessionTokens};
pub use store::{MemoryStore, ProfileStore, SessionStore};
