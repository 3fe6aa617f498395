//! Runtime settings for kuil-voice
//!
//! Every tunable lives in the `settings` table. Missing values are written back
//! with the built-in default so the table always shows what is in effect.

use kuil_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

use crate::db::settings::{get_setting, set_setting};

const MIN_EVOLUTION_PERIOD_DAYS: i64 = 1;
const MAX_EVOLUTION_PERIOD_DAYS: i64 = 3650;

/// Presentation heuristic: `min(max(score * multiplier, floor), ceiling)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetScorePolicy {
    pub multiplier: f64,
    pub floor: f64,
    pub ceiling: f64,
}

impl TargetScorePolicy {
    pub fn target_for(&self, score: u8) -> u8 {
        let target = (score as f64 * self.multiplier).max(self.floor).min(self.ceiling);
        crate::models::hook_calibration::clamp_score(target)
    }
}

/// Thresholds for the engagement colour band
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngagementBands {
    pub high: u8,
    pub medium: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSettings {
    // === Calibration Engine ===
    pub calibration_target_count: usize,

    // === Hook-Score Calibrator ===
    /// Minimum stored observations before an automatic refit
    pub hook_min_refit_samples: usize,
    /// New observations since the last fit that trigger an automatic refit
    pub hook_refit_batch: usize,
    /// Sample size at which display confidence reaches half of r²
    pub hook_confidence_half_samples: f64,
    pub target_score: TargetScorePolicy,
    pub engagement_bands: EngagementBands,

    // === Voice-Signature Evolution ===
    pub evolution_threshold: u32,
    pub evolution_period_days: i64,
    pub evolution_recent_posts: usize,
    #[serde(with = "duration_secs")]
    pub evolution_check_interval: Duration,

    // === LLM Gateway ===
    #[serde(with = "duration_secs")]
    pub llm_timeout: Duration,

    // === Database ===
    pub db_max_lock_wait_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            calibration_target_count: 12,
            hook_min_refit_samples: 5,
            hook_refit_batch: 5,
            hook_confidence_half_samples: 10.0,
            target_score: TargetScorePolicy {
                multiplier: 2.0,
                floor: 60.0,
                ceiling: 95.0,
            },
            engagement_bands: EngagementBands { high: 70, medium: 40 },
            evolution_threshold: 10,
            evolution_period_days: 30,
            evolution_recent_posts: 10,
            evolution_check_interval: Duration::from_secs(3600),
            llm_timeout: Duration::from_secs(kuil_common::config::DEFAULT_LLM_TIMEOUT_SECS),
            db_max_lock_wait_ms: 5000,
        }
    }
}

/// Read a setting, writing the default back when missing
async fn setting_or_default<T>(pool: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    match get_setting::<T>(pool, key).await? {
        Some(value) => Ok(value),
        None => {
            info!("Setting '{}' not found in database, using default: {}", key, default);
            set_setting(pool, key, default).await?;
            Ok(default)
        }
    }
}

impl RuntimeSettings {
    /// Load runtime settings from database
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let d = Self::default();

        let settings = Self {
            calibration_target_count: setting_or_default(
                pool,
                "calibration_target_count",
                d.calibration_target_count,
            )
            .await?
            .max(1),
            hook_min_refit_samples: setting_or_default(
                pool,
                "hook_min_refit_samples",
                d.hook_min_refit_samples,
            )
            .await?
            .max(2),
            hook_refit_batch: setting_or_default(pool, "hook_refit_batch", d.hook_refit_batch)
                .await?
                .max(1),
            hook_confidence_half_samples: setting_or_default(
                pool,
                "hook_confidence_half_samples",
                d.hook_confidence_half_samples,
            )
            .await?
            .max(f64::EPSILON),
            target_score: TargetScorePolicy {
                multiplier: setting_or_default(
                    pool,
                    "hook_target_multiplier",
                    d.target_score.multiplier,
                )
                .await?,
                floor: setting_or_default(pool, "hook_target_floor", d.target_score.floor).await?,
                ceiling: setting_or_default(pool, "hook_target_ceiling", d.target_score.ceiling)
                    .await?,
            },
            engagement_bands: EngagementBands {
                high: setting_or_default(pool, "engagement_high_threshold", d.engagement_bands.high)
                    .await?,
                medium: setting_or_default(
                    pool,
                    "engagement_medium_threshold",
                    d.engagement_bands.medium,
                )
                .await?,
            },
            evolution_threshold: setting_or_default(
                pool,
                "evolution_threshold",
                d.evolution_threshold,
            )
            .await?
            .max(1),
            evolution_period_days: setting_or_default(
                pool,
                "evolution_period_days",
                d.evolution_period_days,
            )
            .await?
            .clamp(MIN_EVOLUTION_PERIOD_DAYS, MAX_EVOLUTION_PERIOD_DAYS),
            evolution_recent_posts: setting_or_default(
                pool,
                "evolution_recent_posts",
                d.evolution_recent_posts,
            )
            .await?
            .max(1),
            evolution_check_interval: Duration::from_secs(
                setting_or_default(
                    pool,
                    "evolution_check_interval_secs",
                    d.evolution_check_interval.as_secs(),
                )
                .await?
                .max(1),
            ),
            llm_timeout: Duration::from_secs(
                setting_or_default(pool, "llm_timeout_secs", d.llm_timeout.as_secs())
                    .await?
                    .max(1),
            ),
            db_max_lock_wait_ms: setting_or_default(
                pool,
                "db_max_lock_wait_ms",
                d.db_max_lock_wait_ms,
            )
            .await?,
        };

        info!(
            calibration_target_count = settings.calibration_target_count,
            evolution_threshold = settings.evolution_threshold,
            llm_timeout_secs = settings.llm_timeout.as_secs(),
            "Runtime settings loaded"
        );

        Ok(settings)
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
