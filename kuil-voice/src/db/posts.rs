//! Published post storage
//!
//! Recording a post also bumps the user's evolution counter in the same
//! transaction.

use kuil_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::PublishedPost;
use crate::utils::timestamps::{from_db, to_db, uuid_from_db};

/// Insert a post and increment `posts_since_last_evolution`
///
/// Returns the counter value after the increment.
pub async fn insert_post(pool: &SqlitePool, post: &PublishedPost) -> Result<u32> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO published_posts (
            post_id, user_id, content, tone_label, predicted_hook_score, published_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(post.post_id.to_string())
    .bind(post.user_id.to_string())
    .bind(&post.content)
    .bind(post.tone_label.as_deref())
    .bind(post.predicted_hook_score.map(|s| s as i64))
    .bind(to_db(&post.published_at))
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO voice_evolution_state (user_id, posts_since_last_evolution)
        VALUES (?, 1)
        ON CONFLICT(user_id) DO UPDATE SET
            posts_since_last_evolution = posts_since_last_evolution + 1
        "#,
    )
    .bind(post.user_id.to_string())
    .execute(&mut *tx)
    .await?;

    let counter: i64 = sqlx::query_scalar(
        "SELECT posts_since_last_evolution FROM voice_evolution_state WHERE user_id = ?",
    )
    .bind(post.user_id.to_string())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(counter.max(0) as u32)
}

fn post_from_row(row: SqliteRow) -> Result<PublishedPost> {
    let post_id: String = row.try_get("post_id")?;
    let user_id: String = row.try_get("user_id")?;
    let predicted: Option<i64> = row.try_get("predicted_hook_score")?;
    let published_at: String = row.try_get("published_at")?;

    Ok(PublishedPost {
        post_id: uuid_from_db("post_id", &post_id)?,
        user_id: uuid_from_db("user_id", &user_id)?,
        content: row.try_get("content")?,
        tone_label: row.try_get("tone_label")?,
        predicted_hook_score: predicted.map(|s| s.clamp(0, 100) as u8),
        published_at: from_db("published_at", &published_at)?,
    })
}

/// Load one of the user's posts
pub async fn load_post(pool: &SqlitePool, user_id: Uuid, post_id: Uuid) -> Result<PublishedPost> {
    let row = sqlx::query(
        r#"
        SELECT post_id, user_id, content, tone_label, predicted_hook_score, published_at
        FROM published_posts
        WHERE post_id = ? AND user_id = ?
        "#,
    )
    .bind(post_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("post {}", post_id)))?;

    post_from_row(row)
}

/// The user's `limit` most recent posts, newest first
pub async fn recent_posts(pool: &SqlitePool, user_id: Uuid, limit: usize) -> Result<Vec<PublishedPost>> {
    let rows = sqlx::query(
        r#"
        SELECT post_id, user_id, content, tone_label, predicted_hook_score, published_at
        FROM published_posts
        WHERE user_id = ?
        ORDER BY published_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(post_from_row).collect()
}
