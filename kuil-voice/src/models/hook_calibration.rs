//! Hook-score calibration data
//!
//! A per-user linear correction `adjusted = raw * factor + bias` that maps the
//! model's predicted hook score onto observed engagement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_FACTOR: f64 = 1.0;
pub const DEFAULT_BIAS: f64 = 0.0;

/// Factor bounds applied to every fit
pub const FACTOR_MIN: f64 = 0.5;
pub const FACTOR_MAX: f64 = 1.5;

/// Bias bounds applied to every fit
pub const BIAS_LIMIT: f64 = 20.0;

/// Clamp a raw score into the 0..=100 hook-score range
pub fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Current calibration for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCalibration {
    pub user_id: Uuid,
    pub factor: f64,
    pub bias: f64,
    pub sample_size: usize,
    /// None until the first successful fit
    pub r_squared: Option<f64>,
    pub last_calibrated_at: Option<DateTime<Utc>>,
    /// Prior fits, oldest first
    pub history: Vec<CalibrationFit>,
}

/// Output of one regression fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFit {
    pub factor: f64,
    pub bias: f64,
    pub r_squared: f64,
    pub sample_size: usize,
    pub fitted_at: DateTime<Utc>,
}

impl HookCalibration {
    /// Uncalibrated defaults (factor 1, bias 0)
    pub fn uncalibrated(user_id: Uuid) -> Self {
        Self {
            user_id,
            factor: DEFAULT_FACTOR,
            bias: DEFAULT_BIAS,
            sample_size: 0,
            r_squared: None,
            last_calibrated_at: None,
            history: Vec::new(),
        }
    }

    /// `clamp(round(raw * factor + bias), 0, 100)`
    pub fn predict(&self, raw_score: i64) -> u8 {
        clamp_score(raw_score as f64 * self.factor + self.bias)
    }

    pub fn is_calibrated(&self) -> bool {
        self.last_calibrated_at.is_some()
    }
}

/// Raw engagement counters for a published post
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub likes: u32,
    pub comments: u32,
    pub shares: u32,
    pub impressions: u32,
    pub hours_since_publish: f64,
}

/// Weighted interactions per impression that maps to the top of the scale
const RATE_FOR_FULL_SCORE: f64 = 0.10;
/// Weighted interactions per hour that maps to the top of the scale
const VELOCITY_FOR_FULL_SCORE: f64 = 5.0;
const RATE_WEIGHT: f64 = 0.7;
const VELOCITY_WEIGHT: f64 = 0.3;

impl EngagementMetrics {
    /// Comments count double and shares triple a like
    pub fn weighted_interactions(&self) -> f64 {
        self.likes as f64 + 2.0 * self.comments as f64 + 3.0 * self.shares as f64
    }

    /// Observed engagement on the 0..=100 scale
    ///
    /// 70% engagement rate (weighted interactions per impression), 30%
    /// velocity (weighted interactions per hour since publish, at least one
    /// hour). No impressions means no observed engagement.
    pub fn engagement_score(&self) -> u8 {
        if self.impressions == 0 {
            return 0;
        }

        let weighted = self.weighted_interactions();
        let rate = weighted / self.impressions as f64;
        let hours = self.hours_since_publish.max(1.0);
        let velocity = weighted / hours;

        let rate_part = (rate / RATE_FOR_FULL_SCORE).min(1.0);
        let velocity_part = (velocity / VELOCITY_FOR_FULL_SCORE).min(1.0);

        clamp_score(100.0 * (RATE_WEIGHT * rate_part + VELOCITY_WEIGHT * velocity_part))
    }
}

/// One (predicted, actual) observation; immutable once captured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementFeedback {
    pub feedback_id: Uuid,
    pub user_id: Uuid,
    /// None for observations recorded without a published post
    pub post_id: Option<Uuid>,
    pub predicted_hook_score: u8,
    pub actual_engagement_score: u8,
    pub metrics: Option<EngagementMetrics>,
    pub captured_at: DateTime<Utc>,
}

/// Colour band shown next to an engagement score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementBand {
    High,
    Medium,
    Low,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration(factor: f64, bias: f64) -> HookCalibration {
        HookCalibration {
            factor,
            bias,
            ..HookCalibration::uncalibrated(Uuid::new_v4())
        }
    }

    #[test]
    fn test_uncalibrated_predict_is_identity_within_range() {
        let cal = HookCalibration::uncalibrated(Uuid::new_v4());
        assert_eq!(cal.predict(0), 0);
        assert_eq!(cal.predict(55), 55);
        assert_eq!(cal.predict(100), 100);
        assert!(!cal.is_calibrated());
    }

    #[test]
    fn test_predict_clamps_any_input() {
        let cal = calibration(1.5, 20.0);
        assert_eq!(cal.predict(90), 100);
        assert_eq!(cal.predict(i64::MAX / 4), 100);
        assert_eq!(calibration(0.5, -20.0).predict(-500), 0);
        assert_eq!(calibration(0.5, -20.0).predict(10), 0);
    }

    #[test]
    fn test_predict_rounds() {
        // 33 * 1.1 + 2.0 = 38.3
        assert_eq!(calibration(1.1, 2.0).predict(33), 38);
        // 35 * 1.1 + 2.0 = 40.5 rounds away from zero
        assert_eq!(calibration(1.1, 2.0).predict(35), 41);
    }

    #[test]
    fn test_predict_is_monotonic_for_nonnegative_factor() {
        for &(factor, bias) in &[(0.5, -20.0), (1.0, 0.0), (1.5, 20.0), (0.0, 7.0)] {
            let cal = calibration(factor, bias);
            let mut previous = cal.predict(-50);
            for raw in -49..=150 {
                let current = cal.predict(raw);
                assert!(current >= previous, "factor {} bias {} raw {}", factor, bias, raw);
                previous = current;
            }
        }
    }

    #[test]
    fn test_engagement_score_without_impressions_is_zero() {
        let metrics = EngagementMetrics {
            likes: 10,
            comments: 2,
            shares: 1,
            impressions: 0,
            hours_since_publish: 5.0,
        };
        assert_eq!(metrics.engagement_score(), 0);
    }

    #[test]
    fn test_engagement_score_saturates() {
        let metrics = EngagementMetrics {
            likes: 500,
            comments: 100,
            shares: 50,
            impressions: 2000,
            hours_since_publish: 2.0,
        };
        assert_eq!(metrics.engagement_score(), 100);
    }

    #[test]
    fn test_engagement_score_blends_rate_and_velocity() {
        // weighted = 20 + 2*5 + 3*0 = 30; rate = 0.03 → 0.3; velocity = 30/30 = 1.0 → 0.2
        let metrics = EngagementMetrics {
            likes: 20,
            comments: 5,
            shares: 0,
            impressions: 1000,
            hours_since_publish: 30.0,
        };
        // 100 * (0.7*0.3 + 0.3*0.2) = 27
        assert_eq!(metrics.engagement_score(), 27);
    }

    #[test]
    fn test_engagement_score_decays_with_elapsed_time() {
        let fresh = EngagementMetrics {
            likes: 40,
            comments: 4,
            shares: 2,
            impressions: 3000,
            hours_since_publish: 6.0,
        };
        let stale = EngagementMetrics {
            hours_since_publish: 96.0,
            ..fresh
        };
        assert!(fresh.engagement_score() > stale.engagement_score());
    }
}
