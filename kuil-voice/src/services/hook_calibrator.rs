//! Hook-score calibrator
//!
//! Learns a per-user linear correction from (predicted hook score, actual
//! engagement) pairs by ordinary least squares. The fitted slope is held to
//! [0.5, 1.5] and the intercept to [-20, 20], so a handful of noisy
//! observations can only nudge predictions, never invert them.

use chrono::Utc;
use kuil_common::events::{EventBus, KuilEvent};
use kuil_common::Error;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{EngagementBands, RuntimeSettings, TargetScorePolicy};
use crate::db;
use crate::error::{CalibrationError, CalibrationResult};
use crate::models::hook_calibration::{BIAS_LIMIT, FACTOR_MAX, FACTOR_MIN};
use crate::models::{
    CalibrationFit, EngagementBand, EngagementFeedback, EngagementMetrics, HookCalibration,
};
use crate::utils::retry_on_lock;

/// Regression output before it is stamped and stored
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub factor: f64,
    pub bias: f64,
    pub r_squared: f64,
}

/// Fit `actual = predicted * factor + bias` over `(predicted, actual)` points
///
/// Fails with `InsufficientData` when fewer than two distinct predicted values
/// exist. The slope is clamped first, the intercept is recomputed at the
/// clamped slope and then clamped, and r² is measured against that final line.
pub fn fit_linear(points: &[(f64, f64)]) -> CalibrationResult<LinearFit> {
    let n = points.len() as f64;
    if points.len() < 2 {
        return Err(CalibrationError::InsufficientData(format!(
            "{} observation(s), need at least 2",
            points.len()
        )));
    }

    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();

    if sxx <= f64::EPSILON {
        return Err(CalibrationError::InsufficientData(
            "predicted scores have no spread".to_string(),
        ));
    }

    let factor = (sxy / sxx).clamp(FACTOR_MIN, FACTOR_MAX);
    let bias = (mean_y - factor * mean_x).clamp(-BIAS_LIMIT, BIAS_LIMIT);

    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (factor * x + bias)).powi(2))
        .sum();
    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();

    let r_squared = if ss_tot <= f64::EPSILON {
        if ss_res <= f64::EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Ok(LinearFit {
        factor,
        bias,
        r_squared,
    })
}

/// Display confidence: `n / (n + k) * clamp(r², 0, 1)`
///
/// Non-decreasing in both `n` and `r²`, bounded to [0, 1] and saturating as
/// `n` grows.
pub fn confidence(sample_size: usize, r_squared: f64, half_samples: f64) -> f64 {
    let n = sample_size as f64;
    let k = half_samples.max(f64::EPSILON);
    let r2 = if r_squared.is_nan() {
        0.0
    } else {
        r_squared.clamp(0.0, 1.0)
    };
    (n / (n + k)) * r2
}

pub fn engagement_band(score: u8, bands: &EngagementBands) -> EngagementBand {
    if score >= bands.high {
        EngagementBand::High
    } else if score >= bands.medium {
        EngagementBand::Medium
    } else {
        EngagementBand::Low
    }
}

/// Outcome of a refit request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefitOutcome {
    Refitted { fit: CalibrationFit },
    /// Prior calibration kept
    Skipped { reason: String, sample_size: usize },
}

/// Outcome of storing one observation
#[derive(Debug, Clone, Serialize)]
pub struct ObservationOutcome {
    pub feedback: EngagementFeedback,
    /// False when the post already had engagement captured
    pub stored: bool,
    /// Present when an automatic refit ran
    pub refit: Option<RefitOutcome>,
}

/// Calibration state as shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSummary {
    #[serde(flatten)]
    pub calibration: HookCalibration,
    pub confidence: f64,
    pub observation_count: usize,
}

/// Adjusted hook score with its presentation extras
#[derive(Debug, Clone, Serialize)]
pub struct CalibratedScore {
    pub raw_score: i64,
    pub score: u8,
    pub confidence: f64,
    pub target_score: u8,
    pub band: EngagementBand,
    pub factor: f64,
    pub bias: f64,
    pub sample_size: usize,
}

pub struct HookCalibrator {
    db: SqlitePool,
    event_bus: EventBus,
    min_refit_samples: usize,
    refit_batch: usize,
    confidence_half_samples: f64,
    target_score: TargetScorePolicy,
    engagement_bands: EngagementBands,
    max_lock_wait_ms: u64,
}

fn validate_score(name: &str, value: i64) -> CalibrationResult<u8> {
    if (0..=100).contains(&value) {
        Ok(value as u8)
    } else {
        Err(Error::InvalidInput(format!("{} must be within 0..=100, got {}", name, value)).into())
    }
}

impl HookCalibrator {
    pub fn new(db: SqlitePool, event_bus: EventBus, settings: &RuntimeSettings) -> Self {
        Self {
            db,
            event_bus,
            min_refit_samples: settings.hook_min_refit_samples,
            refit_batch: settings.hook_refit_batch,
            confidence_half_samples: settings.hook_confidence_half_samples,
            target_score: settings.target_score,
            engagement_bands: settings.engagement_bands,
            max_lock_wait_ms: settings.db_max_lock_wait_ms,
        }
    }

    pub async fn calibration(&self, user_id: Uuid) -> CalibrationResult<CalibrationSummary> {
        db::users::require_user(&self.db, user_id).await?;
        let calibration = db::hook_calibration::load_calibration(&self.db, user_id).await?;
        let observation_count = db::hook_calibration::count_observations(&self.db, user_id).await?;
        let confidence = self.confidence_of(&calibration);

        Ok(CalibrationSummary {
            calibration,
            confidence,
            observation_count,
        })
    }

    fn confidence_of(&self, calibration: &HookCalibration) -> f64 {
        match calibration.r_squared {
            Some(r2) => confidence(calibration.sample_size, r2, self.confidence_half_samples),
            None => 0.0,
        }
    }

    /// Apply the user's calibration to a raw score
    pub async fn predict(&self, user_id: Uuid, raw_score: i64) -> CalibrationResult<u8> {
        let calibration = db::hook_calibration::load_calibration(&self.db, user_id).await?;
        Ok(calibration.predict(raw_score))
    }

    /// Adjusted score plus confidence, target score and engagement band
    pub async fn calibrated_score(
        &self,
        user_id: Uuid,
        raw_score: i64,
    ) -> CalibrationResult<CalibratedScore> {
        db::users::require_user(&self.db, user_id).await?;
        let calibration = db::hook_calibration::load_calibration(&self.db, user_id).await?;
        let score = calibration.predict(raw_score);

        Ok(CalibratedScore {
            raw_score,
            score,
            confidence: self.confidence_of(&calibration),
            target_score: self.target_score.target_for(score),
            band: engagement_band(score, &self.engagement_bands),
            factor: calibration.factor,
            bias: calibration.bias,
            sample_size: calibration.sample_size,
        })
    }

    /// Store a (predicted, actual) pair not tied to a published post
    pub async fn record_observation(
        &self,
        user_id: Uuid,
        predicted: i64,
        actual: i64,
    ) -> CalibrationResult<ObservationOutcome> {
        db::users::require_user(&self.db, user_id).await?;

        let feedback = EngagementFeedback {
            feedback_id: Uuid::new_v4(),
            user_id,
            post_id: None,
            predicted_hook_score: validate_score("predicted", predicted)?,
            actual_engagement_score: validate_score("actual", actual)?,
            metrics: None,
            captured_at: Utc::now(),
        };

        self.store_feedback(feedback).await
    }

    /// Derive the engagement score from raw metrics and pair it with the
    /// post's predicted hook score
    pub async fn capture_engagement(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        metrics: EngagementMetrics,
    ) -> CalibrationResult<ObservationOutcome> {
        if !metrics.hours_since_publish.is_finite() || metrics.hours_since_publish < 0.0 {
            return Err(Error::InvalidInput(
                "hours_since_publish must be a non-negative number".to_string(),
            )
            .into());
        }

        let post = db::posts::load_post(&self.db, user_id, post_id).await?;
        let predicted = post.predicted_hook_score.ok_or_else(|| {
            Error::InvalidInput(format!("post {} has no predicted hook score", post_id))
        })?;

        let feedback = EngagementFeedback {
            feedback_id: Uuid::new_v4(),
            user_id,
            post_id: Some(post_id),
            predicted_hook_score: predicted,
            actual_engagement_score: metrics.engagement_score(),
            metrics: Some(metrics),
            captured_at: Utc::now(),
        };

        self.store_feedback(feedback).await
    }

    async fn store_feedback(&self, feedback: EngagementFeedback) -> CalibrationResult<ObservationOutcome> {
        let user_id = feedback.user_id;

        let stored = retry_on_lock("insert_engagement_feedback", self.max_lock_wait_ms, || {
            db::hook_calibration::insert_observation(&self.db, &feedback)
        })
        .await?;

        if !stored {
            debug!(%user_id, post_id = ?feedback.post_id, "Engagement already captured, ignoring");
            return Ok(ObservationOutcome {
                feedback,
                stored,
                refit: None,
            });
        }

        debug!(
            %user_id,
            predicted = feedback.predicted_hook_score,
            actual = feedback.actual_engagement_score,
            "Observation recorded"
        );

        let refit = self.maybe_refit(user_id).await?;

        Ok(ObservationOutcome {
            feedback,
            stored,
            refit,
        })
    }

    /// Automatic refit once enough observations exist and a full batch has
    /// arrived since the last fit
    async fn maybe_refit(&self, user_id: Uuid) -> CalibrationResult<Option<RefitOutcome>> {
        let count = db::hook_calibration::count_observations(&self.db, user_id).await?;
        if count < self.min_refit_samples {
            return Ok(None);
        }

        let calibration = db::hook_calibration::load_calibration(&self.db, user_id).await?;
        let since_last_fit = count.saturating_sub(calibration.sample_size);
        if calibration.is_calibrated() && since_last_fit < self.refit_batch {
            return Ok(None);
        }

        Ok(Some(self.refit(user_id).await?))
    }

    /// Refit over every stored observation
    ///
    /// Underdetermined data never fails the caller: the prior calibration is
    /// kept and `Skipped` is returned.
    pub async fn refit(&self, user_id: Uuid) -> CalibrationResult<RefitOutcome> {
        db::users::require_user(&self.db, user_id).await?;

        let observations = db::hook_calibration::load_observations(&self.db, user_id).await?;
        let points: Vec<(f64, f64)> = observations
            .iter()
            .map(|o| (o.predicted_hook_score as f64, o.actual_engagement_score as f64))
            .collect();

        let fit = match fit_linear(&points) {
            Ok(fit) => fit,
            Err(CalibrationError::InsufficientData(reason)) => {
                debug!(%user_id, sample_size = points.len(), %reason, "Refit skipped");
                return Ok(RefitOutcome::Skipped {
                    reason,
                    sample_size: points.len(),
                });
            }
            Err(e) => return Err(e),
        };

        let fit = CalibrationFit {
            factor: fit.factor,
            bias: fit.bias,
            r_squared: fit.r_squared,
            sample_size: points.len(),
            fitted_at: Utc::now(),
        };

        retry_on_lock("save_hook_calibration", self.max_lock_wait_ms, || {
            db::hook_calibration::save_fit(&self.db, user_id, &fit)
        })
        .await?;

        info!(
            %user_id,
            factor = fit.factor,
            bias = fit.bias,
            r_squared = fit.r_squared,
            sample_size = fit.sample_size,
            "Hook calibration refitted"
        );

        self.event_bus.emit_lossy(KuilEvent::HookCalibrationRefit {
            user_id,
            factor: fit.factor,
            bias: fit.bias,
            r_squared: fit.r_squared,
            sample_size: fit.sample_size,
            timestamp: fit.fitted_at,
        });

        Ok(RefitOutcome::Refitted { fit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_exact_line_is_recovered() {
        // actual = 1.2 * predicted + 5
        let points: Vec<(f64, f64)> = [20.0, 40.0, 60.0, 80.0]
            .iter()
            .map(|&x| (x, 1.2 * x + 5.0))
            .collect();
        let fit = fit_linear(&points).unwrap();
        assert_close(fit.factor, 1.2);
        assert_close(fit.bias, 5.0);
        assert_close(fit.r_squared, 1.0);
    }

    #[test]
    fn test_single_distinct_predicted_value_is_insufficient() {
        let points = vec![(50.0, 40.0), (50.0, 60.0), (50.0, 55.0)];
        assert!(matches!(
            fit_linear(&points),
            Err(CalibrationError::InsufficientData(_))
        ));
        assert!(matches!(
            fit_linear(&[(10.0, 10.0)]),
            Err(CalibrationError::InsufficientData(_))
        ));
        assert!(matches!(fit_linear(&[]), Err(CalibrationError::InsufficientData(_))));
    }

    #[test]
    fn test_steep_slope_is_clamped_and_bias_recomputed() {
        // OLS slope 3.0; clamped to 1.5. mean_x 50, mean_y 100 → bias 25 → clamped 20
        let points = vec![(40.0, 70.0), (50.0, 100.0), (60.0, 130.0)];
        let fit = fit_linear(&points).unwrap();
        assert_close(fit.factor, FACTOR_MAX);
        assert_close(fit.bias, BIAS_LIMIT);
        assert!(fit.r_squared >= 0.0 && fit.r_squared <= 1.0);
    }

    #[test]
    fn test_negative_slope_is_clamped_to_minimum() {
        let points = vec![(20.0, 80.0), (50.0, 50.0), (80.0, 20.0)];
        let fit = fit_linear(&points).unwrap();
        assert_close(fit.factor, FACTOR_MIN);
        // mean_y 50 - 0.5 * 50 = 25 → clamped to 20
        assert_close(fit.bias, BIAS_LIMIT);
        // The clamped line fits worse than the mean
        assert_close(fit.r_squared, 0.0);
    }

    #[test]
    fn test_flat_actuals_cannot_be_fit_exactly() {
        // actual constant 30; best slope 0 clamps to 0.5 → cannot be exact
        let points = vec![(10.0, 30.0), (20.0, 30.0)];
        let fit = fit_linear(&points).unwrap();
        assert_close(fit.factor, FACTOR_MIN);
        assert_close(fit.r_squared, 0.0);
    }

    #[test]
    fn test_confidence_bounds_and_monotonicity() {
        assert_close(confidence(0, 1.0, 10.0), 0.0);
        assert_close(confidence(10, 1.0, 10.0), 0.5);
        assert_close(confidence(10, 0.5, 10.0), 0.25);
        assert_close(confidence(5, -0.4, 10.0), 0.0);
        assert_close(confidence(5, 1.7, 10.0), 5.0 / 15.0);
        assert!(confidence(1_000_000, 1.0, 10.0) <= 1.0);

        let mut previous = 0.0;
        for n in 0..200 {
            let c = confidence(n, 0.8, 10.0);
            assert!(c >= previous);
            previous = c;
        }

        let mut previous = 0.0;
        for step in 0..=20 {
            let c = confidence(25, step as f64 / 20.0, 10.0);
            assert!(c >= previous);
            previous = c;
        }
    }

    #[test]
    fn test_engagement_band_thresholds() {
        let bands = EngagementBands { high: 70, medium: 40 };
        assert_eq!(engagement_band(70, &bands), EngagementBand::High);
        assert_eq!(engagement_band(69, &bands), EngagementBand::Medium);
        assert_eq!(engagement_band(40, &bands), EngagementBand::Medium);
        assert_eq!(engagement_band(39, &bands), EngagementBand::Low);
    }

    #[test]
    fn test_score_validation() {
        assert_eq!(validate_score("predicted", 0).unwrap(), 0);
        assert_eq!(validate_score("predicted", 100).unwrap(), 100);
        assert!(validate_score("predicted", 101).is_err());
        assert!(validate_score("actual", -1).is_err());
    }
}
