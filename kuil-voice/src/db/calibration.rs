//! Calibration session database operations
//!
//! Sessions are stored with their sample list (JSON); swipes are one row per
//! position. Finalizing writes the swipe, the session state and the tone
//! preference record in one transaction.

use kuil_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::{CalibrationSession, SamplePost, SessionState, SwipeRecord, TonePreference};
use crate::utils::timestamps::{from_db, opt_from_db, to_db, uuid_from_db};

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

fn from_json<T: serde::de::DeserializeOwned>(value: &str, what: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", what, e)))
}

/// Insert a new open session
pub async fn insert_session(pool: &SqlitePool, session: &CalibrationSession) -> Result<()> {
    let samples = to_json(&session.samples, "samples")?;

    sqlx::query(
        r#"
        INSERT INTO calibration_sessions (
            session_id, user_id, state, target_count, samples, started_at, finalized_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.session_id.to_string())
    .bind(session.user_id.to_string())
    .bind(session.state.as_str())
    .bind(session.target_count as i64)
    .bind(&samples)
    .bind(to_db(&session.started_at))
    .bind(session.finalized_at.as_ref().map(to_db))
    .execute(pool)
    .await?;

    Ok(())
}

async fn session_from_row(pool: &SqlitePool, row: SqliteRow) -> Result<CalibrationSession> {
    let session_id: String = row.try_get("session_id")?;
    let user_id: String = row.try_get("user_id")?;
    let state: String = row.try_get("state")?;
    let target_count: i64 = row.try_get("target_count")?;
    let samples: String = row.try_get("samples")?;
    let started_at: String = row.try_get("started_at")?;
    let finalized_at: Option<String> = row.try_get("finalized_at")?;

    let state = SessionState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("Unknown session state '{}'", state)))?;
    let samples: Vec<SamplePost> = from_json(&samples, "samples")?;
    let swipes = load_swipes(pool, &session_id).await?;

    Ok(CalibrationSession {
        session_id: uuid_from_db("session_id", &session_id)?,
        user_id: uuid_from_db("user_id", &user_id)?,
        state,
        target_count: target_count.max(0) as usize,
        samples,
        swipes,
        started_at: from_db("started_at", &started_at)?,
        finalized_at: opt_from_db("finalized_at", finalized_at)?,
    })
}

async fn load_swipes(pool: &SqlitePool, session_id: &str) -> Result<Vec<SwipeRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT sample_post_id, tone_label, accepted, swiped_at
        FROM calibration_swipes
        WHERE session_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let swiped_at: String = row.try_get("swiped_at")?;
            Ok(SwipeRecord {
                sample_post_id: row.try_get("sample_post_id")?,
                tone_label: row.try_get("tone_label")?,
                accepted: row.try_get::<i64, _>("accepted")? != 0,
                swiped_at: from_db("swiped_at", &swiped_at)?,
            })
        })
        .collect()
}

const SESSION_COLUMNS: &str =
    "session_id, user_id, state, target_count, samples, started_at, finalized_at";

/// Load the user's open session (at most one exists)
pub async fn load_open_session(pool: &SqlitePool, user_id: Uuid) -> Result<Option<CalibrationSession>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM calibration_sessions WHERE user_id = ? AND state = 'open'",
        SESSION_COLUMNS
    ))
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(session_from_row(pool, row).await?)),
        None => Ok(None),
    }
}

/// Load the user's most recently started session in any state
pub async fn load_latest_session(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Option<CalibrationSession>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM calibration_sessions WHERE user_id = ? ORDER BY started_at DESC, rowid DESC LIMIT 1",
        SESSION_COLUMNS
    ))
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(session_from_row(pool, row).await?)),
        None => Ok(None),
    }
}

/// Persist the session's newest swipe
///
/// With `preference`, the session is finalized and the preference record
/// written in the same transaction.
pub async fn save_latest_swipe(
    pool: &SqlitePool,
    session: &CalibrationSession,
    preference: Option<&TonePreference>,
) -> Result<()> {
    let position = session
        .swipes
        .len()
        .checked_sub(1)
        .ok_or_else(|| Error::Internal("save_latest_swipe called with no swipes".to_string()))?;
    let swipe = &session.swipes[position];
    let session_id = session.session_id.to_string();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO calibration_swipes (
            session_id, position, sample_post_id, tone_label, accepted, swiped_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session_id)
    .bind(position as i64)
    .bind(&swipe.sample_post_id)
    .bind(&swipe.tone_label)
    .bind(swipe.accepted as i64)
    .bind(to_db(&swipe.swiped_at))
    .execute(&mut *tx)
    .await?;

    if let Some(preference) = preference {
        sqlx::query(
            "UPDATE calibration_sessions SET state = ?, finalized_at = ? WHERE session_id = ? AND state = 'open'",
        )
        .bind(SessionState::Finalized.as_str())
        .bind(to_db(&preference.created_at))
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO tone_preferences (
                preference_id, user_id, session_id, preferences, sample_contents, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(preference.preference_id.to_string())
        .bind(preference.user_id.to_string())
        .bind(&session_id)
        .bind(to_json(&preference.preferences, "preferences")?)
        .bind(to_json(&preference.samples, "sample contents")?)
        .bind(to_db(&preference.created_at))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove the swipe at `position` from an open session
pub async fn delete_swipe(pool: &SqlitePool, session_id: Uuid, position: usize) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM calibration_swipes
        WHERE session_id = ? AND position = ?
          AND EXISTS (SELECT 1 FROM calibration_sessions WHERE session_id = ? AND state = 'open')
        "#,
    )
    .bind(session_id.to_string())
    .bind(position as i64)
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Discard an open session and its swipes
pub async fn delete_open_session(pool: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let result =
        sqlx::query("DELETE FROM calibration_sessions WHERE session_id = ? AND state = 'open'")
            .bind(session_id.to_string())
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Most recent tone preference record for the user
pub async fn load_latest_preference(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Option<TonePreference>> {
    let row = sqlx::query(
        r#"
        SELECT preference_id, user_id, session_id, preferences, sample_contents, created_at
        FROM tone_preferences
        WHERE user_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let preference_id: String = row.try_get("preference_id")?;
    let user_id: String = row.try_get("user_id")?;
    let session_id: String = row.try_get("session_id")?;
    let preferences: String = row.try_get("preferences")?;
    let samples: String = row.try_get("sample_contents")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Some(TonePreference {
        preference_id: uuid_from_db("preference_id", &preference_id)?,
        user_id: uuid_from_db("user_id", &user_id)?,
        session_id: uuid_from_db("session_id", &session_id)?,
        preferences: from_json(&preferences, "preferences")?,
        samples: from_json(&samples, "sample contents")?,
        created_at: from_db("created_at", &created_at)?,
    }))
}
