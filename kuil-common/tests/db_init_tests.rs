//! Database initialization tests

use kuil_common::db::init::{create_schema, init_database, SCHEMA_VERSION};
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_init_creates_file_and_schema() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("data").join("kuil.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    let tables = table_names(&pool).await;
    for expected in [
        "calibration_sessions",
        "calibration_swipes",
        "engagement_feedback",
        "hook_calibration_history",
        "hook_calibrations",
        "published_posts",
        "schema_version",
        "settings",
        "tone_preferences",
        "users",
        "voice_evolution_state",
        "voice_signature_snapshots",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }

    let version: i32 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[tokio::test]
async fn test_init_is_idempotent_and_keeps_settings() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("kuil.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = '7' WHERE key = 'evolution_threshold'")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let value: String =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'evolution_threshold'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(value, "7");
}

#[tokio::test]
async fn test_default_settings_present() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();

    let target: String =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'calibration_target_count'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(target, "12");

    let timeout: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'llm_timeout_secs'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(timeout, "90");
}

#[tokio::test]
async fn test_null_setting_is_reset_on_init() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();

    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'hook_refit_batch'")
        .execute(&pool)
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();

    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'hook_refit_batch'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(value.as_deref(), Some("5"));
}

#[tokio::test]
async fn test_single_open_session_per_user_enforced() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();

    sqlx::query("INSERT INTO users (user_id, created_at) VALUES ('u1', '2026-01-01T00:00:00Z')")
        .execute(&pool)
        .await
        .unwrap();

    let insert = "INSERT INTO calibration_sessions (session_id, user_id, state, target_count, samples, started_at) \
                  VALUES (?, 'u1', 'open', 12, '[]', '2026-01-01T00:00:00Z')";
    sqlx::query(insert).bind("s1").execute(&pool).await.unwrap();
    assert!(sqlx::query(insert).bind("s2").execute(&pool).await.is_err());

    sqlx::query("UPDATE calibration_sessions SET state = 'finalized' WHERE session_id = 's1'")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(insert).bind("s2").execute(&pool).await.unwrap();
}
