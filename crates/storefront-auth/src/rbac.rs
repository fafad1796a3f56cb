//! Role-based access control
//!
//! Each configured role owns one bit of a mask, at the position given by
//! its id. A route lists the roles it accepts; a caller passes when its
//! own role bit overlaps the route's mask.
//!
//! ```text
//! caller   -> 0 1 0
//! required -> 1 1 0
//! overlap  -> 0 1 0  => allowed
//! ```

use std::collections::HashSet;
use tracing::debug;

use crate::claims::UserClaims;
use crate::config::{AuthConfig, RoleConfig};
use crate::error::AuthError;

/// Masks are `u64`, so at most 64 roles can be configured
pub const MAX_ROLES: usize = 64;

/// Build the mask for a set of role ids
///
/// Ids outside `0..role_count` contribute no bit.
pub fn role_mask(role_ids: &[i32], role_count: usize) -> u64 {
    let limit = role_count.min(MAX_ROLES);
    role_ids
        .iter()
        .filter(|&&id| id >= 0 && (id as usize) < limit)
        .fold(0, |mask, &id| mask | (1u64 << id))
}

/// Check whether `caller_role_id` is one of `required_role_ids`
///
/// An empty requirement matches nobody.
pub fn authorize(caller_role_id: i32, required_role_ids: &[i32], role_count: usize) -> bool {
    if role_count == 0 {
        return false;
    }
    let required = role_mask(required_role_ids, role_count);
    let caller = role_mask(&[caller_role_id], role_count);
    caller & required != 0
}

/// Fixed role-id-to-bit mapping loaded once from configuration
#[derive(Debug, Clone)]
pub struct RoleSet {
    roles: Vec<RoleConfig>,
}

impl RoleSet {
    /// Validate and build the role set
    ///
    /// Ids must be unique and cover `0..len` exactly, so every id names
    /// a distinct, stable bit.
    pub fn new(mut roles: Vec<RoleConfig>) -> Result<Self, AuthError> {
        if roles.is_empty() {
            return Err(AuthError::Configuration("auth.roles is empty".to_string()));
        }
        if roles.len() > MAX_ROLES {
            return Err(AuthError::Configuration(format!(
                "auth.roles has {} entries, at most {} are supported",
                roles.len(),
                MAX_ROLES
            )));
        }

        let mut seen = HashSet::new();
        for role in &roles {
            if role.id < 0 || role.id as usize >= roles.len() {
                return Err(AuthError::Configuration(format!(
                    "role '{}' has id {} outside 0..{}",
                    role.title,
                    role.id,
                    roles.len()
                )));
            }
            if !seen.insert(role.id) {
                return Err(AuthError::Configuration(format!(
                    "role id {} is configured twice",
                    role.id
                )));
            }
        }

        roles.sort_by_key(|r| r.id);
        Ok(Self { roles })
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn roles(&self) -> &[RoleConfig] {
        &self.roles
    }

    /// Look up a role id by title
    pub fn id_of(&self, title: &str) -> Option<i32> {
        self.roles.iter().find(|r| r.title == title).map(|r| r.id)
    }

    /// Look up a role title by id
    pub fn title_of(&self, id: i32) -> Option<&str> {
        self.roles
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.title.as_str())
    }

    pub fn mask(&self, role_ids: &[i32]) -> u64 {
        role_mask(role_ids, self.len())
    }
}

/// Evaluates route role requirements against a caller
#[derive(Debug, Clone)]
pub struct RoleAuthorizer {
    roles: RoleSet,
}

impl RoleAuthorizer {
    pub fn new(roles: RoleSet) -> Self {
        Self { roles }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Ok(Self::new(RoleSet::new(config.roles.clone())?))
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn authorize(&self, caller_role_id: i32, required_role_ids: &[i32]) -> bool {
        authorize(caller_role_id, required_role_ids, self.roles.len())
    }

    /// Route guard check
    ///
    /// Without a caller the request is unauthenticated; a caller whose
    /// role does not overlap is forbidden.
    pub fn check(&self, caller: Option<&UserClaims>, required_role_ids: &[i32]) -> Result<(), AuthError> {
        let caller = caller.ok_or(AuthError::Unauthenticated)?;

        if self.authorize(caller.role, required_role_ids) {
            return Ok(());
        }

        debug!(
            user_id = %caller.id,
            role = caller.role,
            required = ?required_role_ids,
            "Caller role does not satisfy route"
        );
        Err(AuthError::Forbidden)
    }
}
