//! Sign-in session operations

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{NewSession, SessionRecord};

use super::Database;

impl Database {
    // ==================== Session Operations ====================

    /// Create a session record for a successful sign-in
    pub async fn create_session(&self, session: NewSession) -> Result<SessionRecord, DbError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO oauth (id, user_id, access_token, refresh_token, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&session.user_id)
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(SessionRecord {
            id,
            user_id: session.user_id,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a session by ID
    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, user_id, access_token, refresh_token, created_at, updated_at
            FROM oauth
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        result
            .map(|row| SessionRecord::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Find the session currently holding this exact refresh token
    pub async fn find_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<SessionRecord>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, user_id, access_token, refresh_token, created_at, updated_at
            FROM oauth
            WHERE refresh_token = ?
            "#,
        )
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?;

        result
            .map(|row| SessionRecord::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Check whether a user has a live session holding this access token
    pub async fn has_access_token(&self, user_id: &str, access_token: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM oauth
            WHERE user_id = ? AND access_token = ?
            "#,
        )
        .bind(user_id)
        .bind(access_token)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = result.get("count");
        Ok(count > 0)
    }

    /// Replace both tokens of a session
    ///
    /// The row only changes while it still holds `expected_refresh_token`,
    /// so of two racing rotations at most one returns `true`.
    pub async fn update_session_tokens(
        &self,
        id: &str,
        expected_refresh_token: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE oauth
            SET access_token = ?, refresh_token = ?, updated_at = ?
            WHERE id = ? AND refresh_token = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(expected_refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a session (sign-out)
    pub async fn delete_session(&self, id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM oauth WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
