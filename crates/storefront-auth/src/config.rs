//! Credential configuration
//!
//! These types are embedded in the binary's configuration file under
//! `[auth]`. Keys and roles are validated when the components that use
//! them are built, so a bad value halts startup instead of a request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A configured role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleConfig {
    /// Bit position of the role in authorization masks
    pub id: i32,
    pub title: String,
}

/// Signing keys, token lifetimes and role list
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access and refresh tokens
    #[serde(default)]
    pub secret_key: String,
    /// HMAC secret for admin tokens
    #[serde(default)]
    pub admin_key: String,
    /// HMAC secret for API keys
    #[serde(default)]
    pub api_key: String,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_expires_secs")]
    pub access_expires_secs: u64,
    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_expires_secs")]
    pub refresh_expires_secs: u64,
    /// Upper bound for a single session/profile store round trip
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_roles")]
    pub roles: Vec<RoleConfig>,
}

impl AuthConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            admin_key: String::new(),
            api_key: String::new(),
            access_expires_secs: default_access_expires_secs(),
            refresh_expires_secs: default_refresh_expires_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            roles: default_roles(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &"<redacted>")
            .field("admin_key", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("access_expires_secs", &self.access_expires_secs)
            .field("refresh_expires_secs", &self.refresh_expires_secs)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("roles", &self.roles)
            .finish()
    }
}

fn default_access_expires_secs() -> u64 {
    86400 // 1 day
}

fn default_refresh_expires_secs() -> u64 {
    604800 // 7 days
}

fn default_store_timeout_ms() -> u64 {
    3000
}

fn default_roles() -> Vec<RoleConfig> {
    vec![
        RoleConfig {
            id: 0,
            title: "customer".to_string(),
        },
        RoleConfig {
            id: 1,
            title: "admin".to_string(),
        },
    ]
}
