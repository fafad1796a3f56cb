//! JWT token issuance and validation

use chrono::{DateTime, Duration, Months, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::claims::{ISSUER, KeySlot, TokenClaims, TokenClass, UserClaims};
use crate::config::AuthConfig;
use crate::error::AuthError;

/// Algorithms a token header may declare
const HMAC_FAMILY: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Admin tokens are short-lived regardless of configuration
const ADMIN_TOKEN_TTL_SECS: i64 = 300;

/// API keys are valid for two calendar years
const API_KEY_TTL_MONTHS: u32 = 24;

/// Upper bound for configured access and refresh lifetimes (100 years)
const MAX_LIFETIME_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Check a configured lifetime and convert it to signed seconds
fn lifetime_secs(name: &str, secs: u64) -> Result<i64, AuthError> {
    i64::try_from(secs)
        .ok()
        .filter(|s| (1..=MAX_LIFETIME_SECS).contains(s))
        .ok_or_else(|| {
            AuthError::Configuration(format!(
                "auth.{} must be between 1 and {} seconds, got {}",
                name, MAX_LIFETIME_SECS, secs
            ))
        })
}

fn expiry_after(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, AuthError> {
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| AuthError::Configuration(format!("token lifetime of {}s overflows", secs)))
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// HMAC keys, one per [`KeySlot`]
#[derive(Clone)]
pub struct SigningKeys {
    user: KeyPair,
    admin: KeyPair,
    api_key: KeyPair,
}

impl SigningKeys {
    /// Build the key set, rejecting missing or shared secrets and
    /// unusable token lifetimes
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        lifetime_secs("access_expires_secs", config.access_expires_secs)?;
        lifetime_secs("refresh_expires_secs", config.refresh_expires_secs)?;

        let secrets = [
            ("secret_key", config.secret_key.as_str()),
            ("admin_key", config.admin_key.as_str()),
            ("api_key", config.api_key.as_str()),
        ];

        for (name, secret) in secrets {
            if secret.is_empty() {
                return Err(AuthError::Configuration(format!("auth.{} is not set", name)));
            }
        }

        for (i, (name, secret)) in secrets.iter().enumerate() {
            if let Some((other, _)) = secrets[i + 1..].iter().find(|(_, s)| s == secret) {
                return Err(AuthError::Configuration(format!(
                    "auth.{} and auth.{} must not share a secret",
                    name, other
                )));
            }
        }

        Ok(Self {
            user: KeyPair::from_secret(&config.secret_key),
            admin: KeyPair::from_secret(&config.admin_key),
            api_key: KeyPair::from_secret(&config.api_key),
        })
    }

    fn pair(&self, class: TokenClass) -> &KeyPair {
        match class.key_slot() {
            KeySlot::User => &self.user,
            KeySlot::Admin => &self.admin,
            KeySlot::ApiKey => &self.api_key,
        }
    }
}

/// Builds signed tokens for each token class
#[derive(Clone)]
pub struct TokenFactory {
    keys: SigningKeys,
    access_expires_secs: i64,
    refresh_expires_secs: i64,
}

impl TokenFactory {
    /// Create a new token factory
    pub fn new(keys: SigningKeys, config: &AuthConfig) -> Self {
        Self {
            keys,
            access_expires_secs: i64::try_from(config.access_expires_secs).unwrap_or(i64::MAX),
            refresh_expires_secs: i64::try_from(config.refresh_expires_secs).unwrap_or(i64::MAX),
        }
    }

    /// Issue a token of the given class
    ///
    /// Access and refresh tokens require `claims`; admin tokens and API
    /// keys must not carry any.
    pub fn issue(&self, class: TokenClass, claims: Option<&UserClaims>) -> Result<String, AuthError> {
        self.issue_at(class, claims, Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        class: TokenClass,
        claims: Option<&UserClaims>,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        match (class.carries_user_claims(), claims) {
            (true, None) => {
                return Err(AuthError::Configuration(format!(
                    "{} tokens require user claims",
                    class
                )));
            }
            (false, Some(_)) => {
                return Err(AuthError::Configuration(format!(
                    "{} tokens cannot carry user claims",
                    class
                )));
            }
            _ => {}
        }

        let expires_at = match class {
            TokenClass::Access => expiry_after(now, self.access_expires_secs)?,
            TokenClass::Refresh => expiry_after(now, self.refresh_expires_secs)?,
            TokenClass::Admin => expiry_after(now, ADMIN_TOKEN_TTL_SECS)?,
            TokenClass::ApiKey => now
                .checked_add_months(Months::new(API_KEY_TTL_MONTHS))
                .ok_or_else(|| AuthError::Configuration("API key expiry overflow".to_string()))?,
        };

        self.sign(class, claims.cloned(), now, expires_at.timestamp())
    }

    /// Issue a refresh token whose expiry is pinned to `expires_at`
    ///
    /// Rotation uses this to keep the original session's outer expiry
    /// instead of sliding it forward.
    pub fn reissue_refresh(&self, claims: &UserClaims, expires_at: i64) -> Result<String, AuthError> {
        self.sign(TokenClass::Refresh, Some(claims.clone()), Utc::now(), expires_at)
    }

    fn sign(
        &self,
        class: TokenClass,
        claims: Option<UserClaims>,
        now: DateTime<Utc>,
        expires_at: i64,
    ) -> Result<String, AuthError> {
        let payload = TokenClaims {
            iss: ISSUER.to_string(),
            sub: class.subject().to_string(),
            aud: class.audience().iter().map(|a| a.to_string()).collect(),
            exp: expires_at,
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            claims,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &self.keys.pair(class).encoding,
        )
        .map_err(|e| {
            error!(class = %class, error = %e, "Failed to sign token");
            AuthError::Configuration(format!("failed to sign {} token", class))
        })?;

        debug!(class = %class, exp = expires_at, "Issued token");
        metrics::counter!("storefront_auth_tokens_issued_total", "class" => class.as_str())
            .increment(1);

        Ok(token)
    }
}

/// Verifies tokens against the key of their expected class
#[derive(Clone)]
pub struct TokenValidator {
    keys: SigningKeys,
}

impl TokenValidator {
    /// Create a new token validator
    pub fn new(keys: SigningKeys) -> Self {
        Self { keys }
    }

    /// Validate a token of the given class and return its payload
    pub fn verify(&self, class: TokenClass, token: &str) -> Result<TokenClaims, AuthError> {
        let header = decode_header(token).map_err(|e| {
            debug!(class = %class, error = %e, "Token header is unreadable");
            AuthError::Malformed
        })?;

        // Checked before any key is touched
        if !HMAC_FAMILY.contains(&header.alg) {
            warn!(class = %class, alg = ?header.alg, "Token declares an unexpected signing algorithm");
            return Err(AuthError::VerificationFailed);
        }

        let data = decode::<TokenClaims>(token, &self.keys.pair(class).decoding, &validation_for(class))
            .map_err(|e| classify(class, e))?;

        if class.carries_user_claims() && data.claims.claims.is_none() {
            debug!(class = %class, "Token has no user claims");
            return Err(AuthError::ClaimsTypeMismatch);
        }

        Ok(data.claims)
    }

    /// Validate an access or refresh token and return its user claims
    pub fn verify_user(&self, class: TokenClass, token: &str) -> Result<UserClaims, AuthError> {
        self.verify(class, token)?
            .claims
            .ok_or(AuthError::ClaimsTypeMismatch)
    }
}

fn validation_for(class: TokenClass) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = HMAC_FAMILY.to_vec();
    validation.leeway = 0;
    validation.validate_nbf = true;
    validation.set_issuer(&[ISSUER]);
    validation.set_audience(class.audience());
    validation.sub = Some(class.subject().to_string());
    validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub", "aud"]);
    validation
}

fn classify(class: TokenClass, err: jsonwebtoken::errors::Error) -> AuthError {
    let mapped = match err.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
            AuthError::Malformed
        }
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::Json(_) => AuthError::ClaimsTypeMismatch,
        _ => AuthError::VerificationFailed,
    };
    debug!(class = %class, error = %err, reason = mapped.reason(), "Token rejected");
    mapped
}
