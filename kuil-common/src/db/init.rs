//! Database initialization
//!
//! Creates the database file on first run, applies connection pragmas, creates
//! every table idempotently and fills in default runtime settings.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Schema version written to `schema_version` on first initialization
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection pragma; cascades depend on it
                sqlx::query("PRAGMA foreign_keys = ON")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer (scheduler + API requests)
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    let timeout_ms: i64 = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'db_lock_retry_ms'",
    )
    .fetch_optional(&pool)
    .await?
    .unwrap_or(250);

    sqlx::query(&format!("PRAGMA busy_timeout = {}", timeout_ms))
        .execute(&pool)
        .await?;
    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Create all tables and default settings on an existing pool
///
/// Idempotent. Tests call this directly on an in-memory pool.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_schema_version_table(pool).await?;
    create_users_table(pool).await?;
    create_settings_table(pool).await?;

    // Calibration Engine
    create_calibration_sessions_table(pool).await?;
    create_calibration_swipes_table(pool).await?;
    create_tone_preferences_table(pool).await?;

    // Hook-Score Calibrator
    create_published_posts_table(pool).await?;
    create_hook_calibrations_table(pool).await?;
    create_hook_calibration_history_table(pool).await?;
    create_engagement_feedback_table(pool).await?;

    // Voice-Signature Evolution
    create_voice_evolution_state_table(pool).await?;
    create_voice_signature_snapshots_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    init_default_settings(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_calibration_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_sessions (
            session_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            state TEXT NOT NULL CHECK (state IN ('open', 'finalized')),
            target_count INTEGER NOT NULL CHECK (target_count > 0),
            samples TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finalized_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one open session per user
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_calibration_sessions_open
        ON calibration_sessions(user_id) WHERE state = 'open'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_calibration_swipes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_swipes (
            session_id TEXT NOT NULL REFERENCES calibration_sessions(session_id) ON DELETE CASCADE,
            position INTEGER NOT NULL CHECK (position >= 0),
            sample_post_id TEXT NOT NULL,
            tone_label TEXT NOT NULL,
            accepted INTEGER NOT NULL CHECK (accepted IN (0, 1)),
            swiped_at TEXT NOT NULL,
            PRIMARY KEY (session_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tone_preferences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tone_preferences (
            preference_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            session_id TEXT NOT NULL,
            preferences TEXT NOT NULL,
            sample_contents TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_published_posts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS published_posts (
            post_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            tone_label TEXT,
            predicted_hook_score INTEGER CHECK (predicted_hook_score BETWEEN 0 AND 100),
            published_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_published_posts_user ON published_posts(user_id, published_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_hook_calibrations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hook_calibrations (
            user_id TEXT PRIMARY KEY REFERENCES users(user_id) ON DELETE CASCADE,
            factor REAL NOT NULL DEFAULT 1.0,
            bias REAL NOT NULL DEFAULT 0.0,
            sample_size INTEGER NOT NULL DEFAULT 0,
            r_squared REAL,
            last_calibrated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_hook_calibration_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hook_calibration_history (
            fit_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            factor REAL NOT NULL,
            bias REAL NOT NULL,
            sample_size INTEGER NOT NULL,
            r_squared REAL NOT NULL,
            fitted_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_engagement_feedback_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS engagement_feedback (
            feedback_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            post_id TEXT UNIQUE REFERENCES published_posts(post_id) ON DELETE CASCADE,
            predicted_hook_score INTEGER NOT NULL,
            actual_engagement_score INTEGER NOT NULL,
            likes INTEGER,
            comments INTEGER,
            shares INTEGER,
            impressions INTEGER,
            hours_since_publish REAL,
            captured_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_engagement_feedback_user ON engagement_feedback(user_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_voice_evolution_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voice_evolution_state (
            user_id TEXT PRIMARY KEY REFERENCES users(user_id) ON DELETE CASCADE,
            posts_since_last_evolution INTEGER NOT NULL DEFAULT 0,
            last_evolved_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_voice_signature_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voice_signature_snapshots (
            snapshot_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            formal REAL NOT NULL CHECK (formal BETWEEN 0 AND 10),
            bold REAL NOT NULL CHECK (bold BETWEEN 0 AND 10),
            empathetic REAL NOT NULL CHECK (empathetic BETWEEN 0 AND 10),
            complexity REAL NOT NULL CHECK (complexity BETWEEN 0 AND 10),
            brevity REAL NOT NULL CHECK (brevity BETWEEN 0 AND 10),
            primary_tone TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence BETWEEN 0 AND 1),
            trigger_reason TEXT NOT NULL
                CHECK (trigger_reason IN ('initial', 'periodic', 'manual', 'threshold', 'calibration')),
            deltas TEXT,
            analyzed_post_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_voice_snapshots_user ON voice_signature_snapshots(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures every runtime tunable exists; NULL values are reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Calibration Engine
    ensure_setting(pool, "calibration_target_count", "12").await?;

    // Hook-Score Calibrator
    ensure_setting(pool, "hook_min_refit_samples", "5").await?;
    ensure_setting(pool, "hook_refit_batch", "5").await?;
    ensure_setting(pool, "hook_confidence_half_samples", "10").await?;
    ensure_setting(pool, "hook_target_multiplier", "2").await?;
    ensure_setting(pool, "hook_target_floor", "60").await?;
    ensure_setting(pool, "hook_target_ceiling", "95").await?;
    ensure_setting(pool, "engagement_high_threshold", "70").await?;
    ensure_setting(pool, "engagement_medium_threshold", "40").await?;

    // Voice-Signature Evolution
    ensure_setting(pool, "evolution_threshold", "10").await?;
    ensure_setting(pool, "evolution_period_days", "30").await?;
    ensure_setting(pool, "evolution_recent_posts", "10").await?;
    ensure_setting(pool, "evolution_check_interval_secs", "3600").await?;

    // LLM Gateway
    ensure_setting(pool, "llm_timeout_secs", "90").await?;

    // Database contention
    ensure_setting(pool, "db_max_lock_wait_ms", "5000").await?;
    ensure_setting(pool, "db_lock_retry_ms", "250").await?;

    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// Missing → created with the default. Present but NULL → reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match row {
        None => {
            // INSERT OR IGNORE handles concurrent initialization
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some((None,)) => {
            sqlx::query("UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some((Some(_),)) => {}
    }

    Ok(())
}
