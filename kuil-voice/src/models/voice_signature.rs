//! Voice signature snapshots and the evolution state machine
//!
//! Evolution cycle for one user:
//! IDLE → CHECK_DUE → ANALYZING → SNAPSHOTTING → IDLE
//! A check that is not due, or whose analysis fails, returns straight to IDLE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DIMENSION_MIN: f64 = 0.0;
pub const DIMENSION_MAX: f64 = 10.0;

/// Five-dimension tone profile, each dimension in [0, 10]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneDimensions {
    pub formal: f64,
    pub bold: f64,
    pub empathetic: f64,
    pub complexity: f64,
    pub brevity: f64,
}

fn clamp_dimension(value: f64) -> f64 {
    if value.is_nan() {
        return DIMENSION_MIN;
    }
    value.clamp(DIMENSION_MIN, DIMENSION_MAX)
}

impl ToneDimensions {
    pub fn clamped(self) -> Self {
        Self {
            formal: clamp_dimension(self.formal),
            bold: clamp_dimension(self.bold),
            empathetic: clamp_dimension(self.empathetic),
            complexity: clamp_dimension(self.complexity),
            brevity: clamp_dimension(self.brevity),
        }
    }

    /// Per-dimension `self - previous`
    pub fn delta_from(&self, previous: &ToneDimensions) -> ToneDimensions {
        ToneDimensions {
            formal: self.formal - previous.formal,
            bold: self.bold - previous.bold,
            empathetic: self.empathetic - previous.empathetic,
            complexity: self.complexity - previous.complexity,
            brevity: self.brevity - previous.brevity,
        }
    }
}

/// Why a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerReason {
    /// User's first-ever signature
    Initial,
    /// Elapsed-time re-analysis
    Periodic,
    /// Explicit user request
    Manual,
    /// Post volume since last evolution reached the threshold
    Threshold,
    /// Follow-up to a completed tone calibration
    Calibration,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Initial => "initial",
            TriggerReason::Periodic => "periodic",
            TriggerReason::Manual => "manual",
            TriggerReason::Threshold => "threshold",
            TriggerReason::Calibration => "calibration",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(TriggerReason::Initial),
            "periodic" => Ok(TriggerReason::Periodic),
            "manual" => Ok(TriggerReason::Manual),
            "threshold" => Ok(TriggerReason::Threshold),
            "calibration" => Ok(TriggerReason::Calibration),
            other => Err(format!("unknown trigger reason '{}'", other)),
        }
    }
}

/// Point-in-time voice signature; append-only, latest is current
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSignatureSnapshot {
    pub snapshot_id: Uuid,
    pub user_id: Uuid,
    pub dimensions: ToneDimensions,
    pub primary_tone: String,
    /// In [0, 1]
    pub confidence: f64,
    pub trigger_reason: TriggerReason,
    /// None when there was no prior snapshot
    pub deltas: Option<ToneDimensions>,
    pub analyzed_post_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Per-user evolution bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionState {
    pub user_id: Uuid,
    pub posts_since_last_evolution: u32,
    pub last_evolved_at: Option<DateTime<Utc>>,
}

impl EvolutionState {
    pub fn fresh(user_id: Uuid) -> Self {
        Self {
            user_id,
            posts_since_last_evolution: 0,
            last_evolved_at: None,
        }
    }
}

/// Evolution state machine phase for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvolutionPhase {
    Idle,
    CheckDue,
    Analyzing,
    Snapshotting,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(v: f64) -> ToneDimensions {
        ToneDimensions {
            formal: v,
            bold: v,
            empathetic: v,
            complexity: v,
            brevity: v,
        }
    }

    #[test]
    fn test_clamped_bounds_each_dimension() {
        let raw = ToneDimensions {
            formal: -3.0,
            bold: 12.5,
            empathetic: 4.2,
            complexity: f64::NAN,
            brevity: 10.0,
        };
        let clamped = raw.clamped();
        assert_eq!(clamped.formal, 0.0);
        assert_eq!(clamped.bold, 10.0);
        assert_eq!(clamped.empathetic, 4.2);
        assert_eq!(clamped.complexity, 0.0);
        assert_eq!(clamped.brevity, 10.0);
    }

    #[test]
    fn test_delta_from_previous() {
        let previous = dims(5.0);
        let current = ToneDimensions {
            formal: 6.5,
            ..dims(5.0)
        };
        let delta = current.delta_from(&previous);
        assert_eq!(delta.formal, 1.5);
        assert_eq!(delta.bold, 0.0);
    }

    #[test]
    fn test_trigger_reason_text() {
        for reason in [
            TriggerReason::Initial,
            TriggerReason::Periodic,
            TriggerReason::Manual,
            TriggerReason::Threshold,
            TriggerReason::Calibration,
        ] {
            assert_eq!(reason.as_str().parse::<TriggerReason>().unwrap(), reason);
        }
        assert!("weekly".parse::<TriggerReason>().is_err());
        assert_eq!(
            serde_json::to_string(&TriggerReason::Threshold).unwrap(),
            "\"threshold\""
        );
    }
}
