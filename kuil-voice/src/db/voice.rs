//! Voice signature snapshots and evolution bookkeeping

use kuil_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::{EvolutionState, ToneDimensions, TriggerReason, VoiceSignatureSnapshot};
use crate::utils::timestamps::{from_db, opt_from_db, to_db, uuid_from_db};

/// Evolution counter and last evolution time (fresh state if never recorded)
pub async fn load_evolution_state(pool: &SqlitePool, user_id: Uuid) -> Result<EvolutionState> {
    let row: Option<(i64, Option<String>)> = sqlx::query_as(
        "SELECT posts_since_last_evolution, last_evolved_at FROM voice_evolution_state WHERE user_id = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some((count, last_evolved_at)) => Ok(EvolutionState {
            user_id,
            posts_since_last_evolution: count.max(0) as u32,
            last_evolved_at: opt_from_db("last_evolved_at", last_evolved_at)?,
        }),
        None => Ok(EvolutionState::fresh(user_id)),
    }
}

const SNAPSHOT_COLUMNS: &str = "snapshot_id, user_id, formal, bold, empathetic, complexity, brevity, \
     primary_tone, confidence, trigger_reason, deltas, analyzed_post_count, created_at";

fn snapshot_from_row(row: SqliteRow) -> Result<VoiceSignatureSnapshot> {
    let snapshot_id: String = row.try_get("snapshot_id")?;
    let user_id: String = row.try_get("user_id")?;
    let trigger_reason: String = row.try_get("trigger_reason")?;
    let deltas: Option<String> = row.try_get("deltas")?;
    let analyzed: i64 = row.try_get("analyzed_post_count")?;
    let created_at: String = row.try_get("created_at")?;

    let deltas = deltas
        .map(|json| {
            serde_json::from_str::<ToneDimensions>(&json)
                .map_err(|e| Error::Internal(format!("Failed to parse deltas: {}", e)))
        })
        .transpose()?;

    Ok(VoiceSignatureSnapshot {
        snapshot_id: uuid_from_db("snapshot_id", &snapshot_id)?,
        user_id: uuid_from_db("user_id", &user_id)?,
        dimensions: ToneDimensions {
            formal: row.try_get("formal")?,
            bold: row.try_get("bold")?,
            empathetic: row.try_get("empathetic")?,
            complexity: row.try_get("complexity")?,
            brevity: row.try_get("brevity")?,
        },
        primary_tone: row.try_get("primary_tone")?,
        confidence: row.try_get("confidence")?,
        trigger_reason: trigger_reason.parse::<TriggerReason>().map_err(Error::Internal)?,
        deltas,
        analyzed_post_count: analyzed.max(0) as usize,
        created_at: from_db("created_at", &created_at)?,
    })
}

/// Current signature: the most recent snapshot
pub async fn latest_snapshot(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Option<VoiceSignatureSnapshot>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM voice_signature_snapshots WHERE user_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT 1",
        SNAPSHOT_COLUMNS
    ))
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(snapshot_from_row).transpose()
}

/// Snapshot history, newest first
pub async fn list_snapshots(
    pool: &SqlitePool,
    user_id: Uuid,
    limit: usize,
) -> Result<Vec<VoiceSignatureSnapshot>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM voice_signature_snapshots WHERE user_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
        SNAPSHOT_COLUMNS
    ))
    .bind(user_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(snapshot_from_row).collect()
}

/// Persist a snapshot and settle the evolution counter in one transaction
///
/// `analyzed_counter` is the counter value the check started from. Only that
/// many posts are taken off; posts recorded while the analysis ran stay
/// counted for the next evolution.
pub async fn save_snapshot(
    pool: &SqlitePool,
    snapshot: &VoiceSignatureSnapshot,
    analyzed_counter: u32,
) -> Result<()> {
    let deltas = snapshot
        .deltas
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize deltas: {}", e)))?;
    let created_at = to_db(&snapshot.created_at);
    let dims = &snapshot.dimensions;

    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        "INSERT INTO voice_signature_snapshots ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        SNAPSHOT_COLUMNS
    ))
    .bind(snapshot.snapshot_id.to_string())
    .bind(snapshot.user_id.to_string())
    .bind(dims.formal)
    .bind(dims.bold)
    .bind(dims.empathetic)
    .bind(dims.complexity)
    .bind(dims.brevity)
    .bind(&snapshot.primary_tone)
    .bind(snapshot.confidence)
    .bind(snapshot.trigger_reason.as_str())
    .bind(deltas)
    .bind(snapshot.analyzed_post_count as i64)
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO voice_evolution_state (user_id, posts_since_last_evolution, last_evolved_at)
        VALUES (?, 0, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            posts_since_last_evolution = MAX(posts_since_last_evolution - ?, 0),
            last_evolved_at = excluded.last_evolved_at
        "#,
    )
    .bind(snapshot.user_id.to_string())
    .bind(&created_at)
    .bind(analyzed_counter as i64)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
