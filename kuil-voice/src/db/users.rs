//! User rows
//!
//! Users own every other entity; deleting one cascades to all of its rows.

use chrono::Utc;
use kuil_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::utils::timestamps::{to_db, uuid_from_db};

/// Create a user (no-op if it already exists)
pub async fn create_user(pool: &SqlitePool, user_id: Uuid) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?, ?)")
        .bind(user_id.to_string())
        .bind(to_db(&Utc::now()))
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO voice_evolution_state (user_id) VALUES (?)")
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn user_exists(pool: &SqlitePool, user_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE user_id = ?)")
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Fail with NotFound unless the user exists
pub async fn require_user(pool: &SqlitePool, user_id: Uuid) -> Result<()> {
    if user_exists(pool, user_id).await? {
        Ok(())
    } else {
        Err(Error::NotFound(format!("user {}", user_id)))
    }
}

/// Delete a user and, via cascade, everything it owns
///
/// Returns false if the user did not exist.
pub async fn delete_user(pool: &SqlitePool, user_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_user_ids(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT user_id FROM users ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    rows.iter().map(|(id,)| uuid_from_db("user_id", id)).collect()
}
