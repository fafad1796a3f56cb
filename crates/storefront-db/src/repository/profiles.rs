//! Profile operations

use chrono::Utc;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{NewProfile, Profile};
use crate::repository::Database;

impl Database {
    // ==================== Profile Operations ====================

    /// Insert a new profile
    pub async fn insert_profile(&self, profile: NewProfile) -> Result<Profile, DbError> {
        if self.get_profile_by_email(&profile.email).await?.is_some() {
            return Err(DbError::Duplicate("email has been used".to_string()));
        }
        if self.get_profile_by_username(&profile.username).await?.is_some() {
            return Err(DbError::Duplicate("username has been used".to_string()));
        }

        self.insert_profile_row(profile).await
    }

    /// Write the row; a unique violation from a concurrent insert still
    /// surfaces as `Duplicate`
    async fn insert_profile_row(&self, profile: NewProfile) -> Result<Profile, DbError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, username, role_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&profile.email)
        .bind(&profile.username)
        .bind(profile.role_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(duplicate_or_connection)?;

        Ok(Profile {
            id,
            email: profile.email,
            username: profile.username,
            role_id: profile.role_id,
        })
    }

    /// Get a profile by ID
    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, email, username, role_id
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        result.map(|row| Profile::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Get a profile by email
    pub async fn get_profile_by_email(&self, email: &str) -> Result<Option<Profile>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, email, username, role_id
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        result.map(|row| Profile::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Get a profile by username
    pub async fn get_profile_by_username(&self, username: &str) -> Result<Option<Profile>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, email, username, role_id
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        result.map(|row| Profile::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Delete a profile; its sessions go with it
    pub async fn delete_profile(&self, id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn duplicate_or_connection(err: sqlx::Error) -> DbError {
    let column = err
        .as_database_error()
        .filter(|e| e.is_unique_violation())
        .map(|e| if e.message().contains("users.email") { "email" } else { "username" });

    match column {
        Some(column) => DbError::Duplicate(format!("{} has been used", column)),
        None => DbError::Connection(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support;

    fn new_profile(email: &str, username: &str) -> NewProfile {
        NewProfile {
            email: email.to_string(),
            username: username.to_string(),
            role_id: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_profile() {
        let (_dir, db) = test_support::open().await;

        let created = db
            .insert_profile(new_profile("ann@example.com", "ann"))
            .await
            .unwrap();
        let fetched = db.get_profile(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);

        let by_email = db.get_profile_by_email("ann@example.com").await.unwrap();
        assert_eq!(by_email.map(|p| p.id), Some(created.id));
        assert!(db.get_profile("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_and_username() {
        let (_dir, db) = test_support::open().await;
        db.insert_profile(new_profile("ann@example.com", "ann"))
            .await
            .unwrap();

        let err = db
            .insert_profile(new_profile("ann@example.com", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate(msg) if msg == "email has been used"));

        let err = db
            .insert_profile(new_profile("other@example.com", "ann"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate(msg) if msg == "username has been used"));
    }

    #[tokio::test]
    async fn test_unique_violation_maps_to_duplicate() {
        let (_dir, db) = test_support::open().await;
        db.insert_profile(new_profile("ann@example.com", "ann"))
            .await
            .unwrap();

        // Skips the lookups, as a racing insert would
        let err = db
            .insert_profile_row(new_profile("ann@example.com", "ann-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate(msg) if msg == "email has been used"));

        let err = db
            .insert_profile_row(new_profile("ann-2@example.com", "ann"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate(msg) if msg == "username has been used"));
    }
}
