//! Hook calibration and engagement observation storage

use kuil_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::{CalibrationFit, EngagementFeedback, EngagementMetrics, HookCalibration};
use crate::utils::timestamps::{from_db, opt_from_db, to_db, uuid_from_db};

/// Current calibration with its fit history
///
/// Users that were never fitted get the uncalibrated defaults.
pub async fn load_calibration(pool: &SqlitePool, user_id: Uuid) -> Result<HookCalibration> {
    let row = sqlx::query(
        r#"
        SELECT factor, bias, sample_size, r_squared, last_calibrated_at
        FROM hook_calibrations
        WHERE user_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    let mut calibration = HookCalibration::uncalibrated(user_id);

    if let Some(row) = row {
        let sample_size: i64 = row.try_get("sample_size")?;
        calibration.factor = row.try_get("factor")?;
        calibration.bias = row.try_get("bias")?;
        calibration.sample_size = sample_size.max(0) as usize;
        calibration.r_squared = row.try_get("r_squared")?;
        calibration.last_calibrated_at =
            opt_from_db("last_calibrated_at", row.try_get("last_calibrated_at")?)?;
    }

    let history = sqlx::query(
        r#"
        SELECT factor, bias, r_squared, sample_size, fitted_at
        FROM hook_calibration_history
        WHERE user_id = ?
        ORDER BY fit_id ASC
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    calibration.history = history
        .into_iter()
        .map(|row| {
            let sample_size: i64 = row.try_get("sample_size")?;
            let fitted_at: String = row.try_get("fitted_at")?;
            Ok(CalibrationFit {
                factor: row.try_get("factor")?,
                bias: row.try_get("bias")?,
                r_squared: row.try_get("r_squared")?,
                sample_size: sample_size.max(0) as usize,
                fitted_at: from_db("fitted_at", &fitted_at)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(calibration)
}

/// Make `fit` the current calibration and append it to the history
pub async fn save_fit(pool: &SqlitePool, user_id: Uuid, fit: &CalibrationFit) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO hook_calibrations (user_id, factor, bias, sample_size, r_squared, last_calibrated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            factor = excluded.factor,
            bias = excluded.bias,
            sample_size = excluded.sample_size,
            r_squared = excluded.r_squared,
            last_calibrated_at = excluded.last_calibrated_at
        "#,
    )
    .bind(user_id.to_string())
    .bind(fit.factor)
    .bind(fit.bias)
    .bind(fit.sample_size as i64)
    .bind(fit.r_squared)
    .bind(to_db(&fit.fitted_at))
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO hook_calibration_history (user_id, factor, bias, sample_size, r_squared, fitted_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id.to_string())
    .bind(fit.factor)
    .bind(fit.bias)
    .bind(fit.sample_size as i64)
    .bind(fit.r_squared)
    .bind(to_db(&fit.fitted_at))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Store an observation
///
/// Returns false when the post already has captured engagement; the stored
/// observation is left untouched.
pub async fn insert_observation(pool: &SqlitePool, feedback: &EngagementFeedback) -> Result<bool> {
    let metrics = feedback.metrics.as_ref();

    let result = sqlx::query(
        r#"
        INSERT INTO engagement_feedback (
            feedback_id, user_id, post_id, predicted_hook_score, actual_engagement_score,
            likes, comments, shares, impressions, hours_since_publish, captured_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(post_id) DO NOTHING
        "#,
    )
    .bind(feedback.feedback_id.to_string())
    .bind(feedback.user_id.to_string())
    .bind(feedback.post_id.map(|id| id.to_string()))
    .bind(feedback.predicted_hook_score as i64)
    .bind(feedback.actual_engagement_score as i64)
    .bind(metrics.map(|m| m.likes as i64))
    .bind(metrics.map(|m| m.comments as i64))
    .bind(metrics.map(|m| m.shares as i64))
    .bind(metrics.map(|m| m.impressions as i64))
    .bind(metrics.map(|m| m.hours_since_publish))
    .bind(to_db(&feedback.captured_at))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn feedback_from_row(row: SqliteRow) -> Result<EngagementFeedback> {
    let feedback_id: String = row.try_get("feedback_id")?;
    let user_id: String = row.try_get("user_id")?;
    let post_id: Option<String> = row.try_get("post_id")?;
    let predicted: i64 = row.try_get("predicted_hook_score")?;
    let actual: i64 = row.try_get("actual_engagement_score")?;
    let captured_at: String = row.try_get("captured_at")?;

    let likes: Option<i64> = row.try_get("likes")?;
    let comments: Option<i64> = row.try_get("comments")?;
    let shares: Option<i64> = row.try_get("shares")?;
    let impressions: Option<i64> = row.try_get("impressions")?;
    let hours: Option<f64> = row.try_get("hours_since_publish")?;

    let metrics = match (likes, comments, shares, impressions, hours) {
        (Some(likes), Some(comments), Some(shares), Some(impressions), Some(hours)) => {
            Some(EngagementMetrics {
                likes: likes.max(0) as u32,
                comments: comments.max(0) as u32,
                shares: shares.max(0) as u32,
                impressions: impressions.max(0) as u32,
                hours_since_publish: hours,
            })
        }
        _ => None,
    };

    Ok(EngagementFeedback {
        feedback_id: uuid_from_db("feedback_id", &feedback_id)?,
        user_id: uuid_from_db("user_id", &user_id)?,
        post_id: post_id.map(|id| uuid_from_db("post_id", &id)).transpose()?,
        predicted_hook_score: predicted.clamp(0, 100) as u8,
        actual_engagement_score: actual.clamp(0, 100) as u8,
        metrics,
        captured_at: from_db("captured_at", &captured_at)?,
    })
}

/// All of a user's observations, oldest first
pub async fn load_observations(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<EngagementFeedback>> {
    let rows = sqlx::query(
        r#"
        SELECT feedback_id, user_id, post_id, predicted_hook_score, actual_engagement_score,
               likes, comments, shares, impressions, hours_since_publish, captured_at
        FROM engagement_feedback
        WHERE user_id = ?
        ORDER BY captured_at ASC, rowid ASC
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(feedback_from_row).collect()
}

pub async fn count_observations(pool: &SqlitePool, user_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM engagement_feedback WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count.max(0) as usize)
}
