//! Sign-in sessions and refresh token rotation

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use storefront_db::{NewSession, Profile};
use tracing::{debug, info};

use crate::claims::{TokenClass, UserClaims};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::jwt::{SigningKeys, TokenFactory, TokenValidator};
use crate::store::{ProfileStore, SessionStore, bounded};

/// Token pair bound to a session record
#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// What a successful sign-in or refresh hands back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct Passport {
    pub user: Profile,
    pub token: SessionTokens,
}

/// Issues, rotates and revokes session credentials
#[derive(Clone)]
pub struct SessionService {
    factory: TokenFactory,
    validator: TokenValidator,
    sessions: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileStore>,
    store_timeout: Duration,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl SessionService {
    pub fn new(
        factory: TokenFactory,
        validator: TokenValidator,
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            validator,
            sessions,
            profiles,
            store_timeout,
        }
    }

    /// Build the service from configuration, validating the signing keys
    pub fn from_config(
        config: &AuthConfig,
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Result<Self, AuthError> {
        let keys = SigningKeys::from_config(config)?;
        Ok(Self::new(
            TokenFactory::new(keys.clone(), config),
            TokenValidator::new(keys),
            sessions,
            profiles,
            config.store_timeout(),
        ))
    }

    pub fn factory(&self) -> &TokenFactory {
        &self.factory
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Start a session for an already authenticated profile
    pub async fn sign_in(&self, profile: &Profile) -> Result<Passport, AuthError> {
        let claims = claims_for(profile);
        let access_token = self.factory.issue(TokenClass::Access, Some(&claims))?;
        let refresh_token = self.factory.issue(TokenClass::Refresh, Some(&claims))?;

        let record = bounded(
            self.store_timeout,
            "create session",
            self.sessions.create(NewSession {
                user_id: profile.id.clone(),
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
            }),
        )
        .await?;

        info!(user_id = %profile.id, session_id = %record.id, "User signed in");

        Ok(Passport {
            user: profile.clone(),
            token: SessionTokens {
                session_id: record.id,
                access_token,
                refresh_token,
            },
        })
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// The presented token must still be the one stored on its session.
    /// The new refresh token keeps the original expiry, so rotation never
    /// extends the session. If the store update fails the old pair stays
    /// valid and nothing new is returned.
    pub async fn rotate(&self, refresh_token: &str) -> Result<Passport, AuthError> {
        let presented = self.validator.verify(TokenClass::Refresh, refresh_token)?;

        let session = bounded(
            self.store_timeout,
            "find session",
            self.sessions.find_by_refresh_token(refresh_token),
        )
        .await?
        .ok_or_else(|| {
            debug!("No session holds the presented refresh token");
            AuthError::SessionNotFound
        })?;

        let profile = bounded(
            self.store_timeout,
            "get profile",
            self.profiles.get(&session.user_id),
        )
        .await?
        .ok_or_else(|| {
            debug!(user_id = %session.user_id, "Session owner has no profile");
            AuthError::ProfileNotFound
        })?;

        let claims = claims_for(&profile);
        let access_token = self.factory.issue(TokenClass::Access, Some(&claims))?;
        let new_refresh_token = self.factory.reissue_refresh(&claims, presented.exp)?;

        let updated = bounded(
            self.store_timeout,
            "update session",
            self.sessions.update(
                &session.id,
                refresh_token,
                &access_token,
                &new_refresh_token,
            ),
        )
        .await?;

        // Another rotation or a sign-out got there first
        if !updated {
            debug!(session_id = %session.id, "Session changed during rotation");
            return Err(AuthError::SessionNotFound);
        }

        info!(session_id = %session.id, user_id = %profile.id, "Rotated refresh token");
        metrics::counter!("storefront_auth_rotations_total").increment(1);

        Ok(Passport {
            user: profile,
            token: SessionTokens {
                session_id: session.id,
                access_token,
                refresh_token: new_refresh_token,
            },
        })
    }

    /// End a session; its refresh token can no longer be rotated
    pub async fn sign_out(&self, session_id: &str) -> Result<(), AuthError> {
        let deleted = bounded(
            self.store_timeout,
            "delete session",
            self.sessions.delete(session_id),
        )
        .await?;

        if !deleted {
            return Err(AuthError::SessionNotFound);
        }

        info!(session_id = %session_id, "User signed out");
        Ok(())
    }
}

fn claims_for(profile: &Profile) -> UserClaims {
    UserClaims {
        id: profile.id.clone(),
        role: profile.role_id,
    }
}
