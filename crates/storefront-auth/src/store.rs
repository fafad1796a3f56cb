//! Session and profile store interfaces
//!
//! The credential core never talks to a database directly. It goes
//! through these traits, implemented here for the SQLite [`Database`]
//! and for an in-process [`MemoryStore`].

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use storefront_db::{Database, DbError, NewSession, Profile, SessionRecord};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::AuthError;

/// Persistence of sign-in sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Find the session currently holding this exact refresh token
    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<SessionRecord>, AuthError>;

    /// Whether the user still has a session holding this access token
    async fn has_access_token(&self, user_id: &str, access_token: &str) -> Result<bool, AuthError>;

    async fn create(&self, session: NewSession) -> Result<SessionRecord, AuthError>;

    /// Replace both tokens, but only while the session still holds
    /// `expected_refresh_token`. Returns `false` when nothing changed.
    async fn update(
        &self,
        session_id: &str,
        expected_refresh_token: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, AuthError>;

    async fn delete(&self, session_id: &str) -> Result<bool, AuthError>;
}

/// Read access to user profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>, AuthError>;
}

/// Run one store round trip under a deadline
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(op, timeout_ms = limit.as_millis() as u64, "Store call timed out");
            Err(AuthError::StoreUnavailable(format!("{} timed out", op)))
        }
    }
}

fn store_error(op: &'static str) -> impl FnOnce(DbError) -> AuthError {
    move |e| {
        error!(op, error = %e, "Store call failed");
        AuthError::StoreUnavailable(format!("{} failed", op))
    }
}

// ==================== SQLite ====================

#[async_trait]
impl SessionStore for Database {
    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<SessionRecord>, AuthError> {
        self.find_session_by_refresh_token(refresh_token)
            .await
            .map_err(store_error("find session"))
    }

    async fn has_access_token(&self, user_id: &str, access_token: &str) -> Result<bool, AuthError> {
        Database::has_access_token(self, user_id, access_token)
            .await
            .map_err(store_error("check access token"))
    }

    async fn create(&self, session: NewSession) -> Result<SessionRecord, AuthError> {
        self.create_session(session)
            .await
            .map_err(store_error("create session"))
    }

    async fn update(
        &self,
        session_id: &str,
        expected_refresh_token: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, AuthError> {
        self.update_session_tokens(session_id, expected_refresh_token, access_token, refresh_token)
            .await
            .map_err(store_error("update session"))
    }

    async fn delete(&self, session_id: &str) -> Result<bool, AuthError> {
        self.delete_session(session_id)
            .await
            .map_err(store_error("delete session"))
    }
}

#[async_trait]
impl ProfileStore for Database {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        self.get_profile(user_id)
            .await
            .map_err(store_error("get profile"))
    }
}

// ==================== In-memory ====================

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, SessionRecord>,
    profiles: HashMap<String, Profile>,
}

/// Session and profile store kept in process memory
///
/// All operations take one lock, so updates are linearizable per session.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.state.lock().profiles.insert(profile.id.clone(), profile);
    }

    pub fn remove_profile(&self, user_id: &str) -> Option<Profile> {
        self.state.lock().profiles.remove(user_id)
    }

    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.state.lock().sessions.get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<SessionRecord>, AuthError> {
        Ok(self
            .state
            .lock()
            .sessions
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .cloned())
    }

    async fn has_access_token(&self, user_id: &str, access_token: &str) -> Result<bool, AuthError> {
        Ok(self
            .state
            .lock()
            .sessions
            .values()
            .any(|s| s.user_id == user_id && s.access_token == access_token))
    }

    async fn create(&self, session: NewSession) -> Result<SessionRecord, AuthError> {
        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: session.user_id,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .sessions
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        session_id: &str,
        expected_refresh_token: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, AuthError> {
        let mut state = self.state.lock();
        match state.sessions.get_mut(session_id) {
            Some(session) if session.refresh_token == expected_refresh_token => {
                session.access_token = access_token.to_string();
                session.refresh_token = refresh_token.to_string();
                session.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool, AuthError> {
        Ok(self.state.lock().sessions.remove(session_id).is_some())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        Ok(self.state.lock().profiles.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_db::NewProfile;

    fn new_session(user_id: &str) -> NewSession {
        NewSession {
            user_id: user_id.to_string(),
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
        }
    }

    async fn exercise(store: &dyn SessionStore, user_id: &str) {
        let record = store.create(new_session(user_id)).await.unwrap();

        let found = store.find_by_refresh_token("r1").await.unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert!(store.has_access_token(user_id, "a1").await.unwrap());

        assert!(store.update(&record.id, "r1", "a2", "r2").await.unwrap());
        assert!(!store.update(&record.id, "r1", "a3", "r3").await.unwrap());
        assert!(store.find_by_refresh_token("r1").await.unwrap().is_none());
        assert!(!store.has_access_token(user_id, "a1").await.unwrap());
        assert!(store.has_access_token(user_id, "a2").await.unwrap());

        assert!(store.delete(&record.id).await.unwrap());
        assert!(!store.delete(&record.id).await.unwrap());
        assert!(store.find_by_refresh_token("r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_session_store() {
        let store = MemoryStore::new();
        exercise(&store, "u-1").await;
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_session_store() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("auth.db").display());
        let db = Database::new(&url).await.unwrap();

        let profile = db
            .insert_profile(NewProfile {
                email: "carol@example.com".to_string(),
                username: "carol".to_string(),
                role_id: 0,
            })
            .await
            .unwrap();

        exercise(&db, &profile.id).await;
        assert_eq!(ProfileStore::get(&db, &profile.id).await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), AuthError> = bounded(Duration::from_millis(10), "slow op", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AuthError::StoreUnavailable(_))));
    }
}
