//! Token payload model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Issuer written into and required from every token
pub const ISSUER: &str = "go-e-commerce";

/// Identity carried by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserClaims {
    /// Subject (user ID)
    pub id: String,
    /// Role ID
    pub role: i32,
}

/// Which signing key a token class uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    User,
    Admin,
    ApiKey,
}

/// Token class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenClass {
    Access,
    Refresh,
    Admin,
    ApiKey,
}

impl TokenClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenClass::Access => "access",
            TokenClass::Refresh => "refresh",
            TokenClass::Admin => "admin",
            TokenClass::ApiKey => "api-key",
        }
    }

    /// Purpose string stored in the `sub` claim
    pub fn subject(&self) -> &'static str {
        match self {
            TokenClass::Access => "access-token",
            TokenClass::Refresh => "refresh-token",
            TokenClass::Admin => "admin-token",
            TokenClass::ApiKey => "api-key",
        }
    }

    pub fn audience(&self) -> &'static [&'static str] {
        match self {
            TokenClass::Access | TokenClass::Refresh => &["user", "admin"],
            TokenClass::Admin => &["admin"],
            TokenClass::ApiKey => &["admin", "customer"],
        }
    }

    /// The signing key is chosen here and nowhere else
    pub fn key_slot(&self) -> KeySlot {
        match self {
            TokenClass::Access | TokenClass::Refresh => KeySlot::User,
            TokenClass::Admin => KeySlot::Admin,
            TokenClass::ApiKey => KeySlot::ApiKey,
        }
    }

    pub fn carries_user_claims(&self) -> bool {
        matches!(self, TokenClass::Access | TokenClass::Refresh)
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenClass::Access),
            "refresh" => Ok(TokenClass::Refresh),
            "admin" => Ok(TokenClass::Admin),
            "api-key" | "apikey" => Ok(TokenClass::ApiKey),
            _ => Err(format!("unknown token class: {}", s)),
        }
    }
}

/// Signed token payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Issuer
    pub iss: String,
    /// Token purpose (see [`TokenClass::subject`])
    pub sub: String,
    /// Intended consumers
    pub aud: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Unique token ID
    pub jti: String,
    /// User identity; `null` for admin and API-key tokens
    pub claims: Option<UserClaims>,
}

impl TokenClaims {
    /// User identity, required for access and refresh tokens
    pub fn user(&self) -> Option<&UserClaims> {
        self.claims.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_class_parse() {
        for class in [
            TokenClass::Access,
            TokenClass::Refresh,
            TokenClass::Admin,
            TokenClass::ApiKey,
        ] {
            assert_eq!(class.as_str().parse::<TokenClass>(), Ok(class));
        }
        assert!("session".parse::<TokenClass>().is_err());
    }

    #[test]
    fn test_key_slots() {
        assert_eq!(TokenClass::Access.key_slot(), TokenClass::Refresh.key_slot());
        assert_ne!(TokenClass::Access.key_slot(), TokenClass::Admin.key_slot());
        assert_ne!(TokenClass::Admin.key_slot(), TokenClass::ApiKey.key_slot());
    }

    #[test]
    fn test_user_claims_wire_format() {
        let claims = UserClaims {
            id: "u-1".to_string(),
            role: 2,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json, serde_json::json!({"id": "u-1", "role": 2}));
    }
}
