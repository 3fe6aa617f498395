//! Tone-calibration session state
//!
//! A session holds the sample posts shown to the user and the ordered
//! accept/reject decisions made on them. Lifecycle:
//! OPEN (appending swipes) → FINALIZED (preferences persisted).
//! A session cancelled while OPEN is discarded and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionStateError;

/// One sample post shown during calibration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePost {
    pub sample_post_id: String,
    pub tone_label: String,
    pub content: String,
}

/// One accept/reject decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwipeRecord {
    pub sample_post_id: String,
    pub tone_label: String,
    pub accepted: bool,
    pub swiped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Finalized,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Finalized => "finalized",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(SessionState::Open),
            "finalized" => Some(SessionState::Finalized),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub state: SessionState,
    pub target_count: usize,
    pub samples: Vec<SamplePost>,
    pub swipes: Vec<SwipeRecord>,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

/// Preference record written when a session completes
///
/// The raw ordered decisions plus the samples they were made on; no derived
/// score is computed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonePreference {
    pub preference_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub preferences: Vec<bool>,
    pub samples: Vec<SamplePost>,
    pub created_at: DateTime<Utc>,
}

impl CalibrationSession {
    /// Create an open session over the first `target_count` samples
    ///
    /// Callers guarantee `samples.len() >= target_count`.
    pub fn new(user_id: Uuid, mut samples: Vec<SamplePost>, target_count: usize) -> Self {
        samples.truncate(target_count);
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            state: SessionState::Open,
            target_count,
            samples,
            swipes: Vec::new(),
            started_at: Utc::now(),
            finalized_at: None,
        }
    }

    /// Sample the next swipe applies to
    pub fn next_sample(&self) -> Option<&SamplePost> {
        if self.state != SessionState::Open {
            return None;
        }
        self.samples.get(self.swipes.len())
    }

    /// Append a decision for the next sample
    pub fn record_swipe(&mut self, accepted: bool) -> Result<&SwipeRecord, SessionStateError> {
        if self.state == SessionState::Finalized || self.is_complete() {
            return Err(SessionStateError::AlreadyComplete);
        }

        let sample = self
            .next_sample()
            .ok_or(SessionStateError::AlreadyComplete)?
            .clone();

        self.swipes.push(SwipeRecord {
            sample_post_id: sample.sample_post_id,
            tone_label: sample.tone_label,
            accepted,
            swiped_at: Utc::now(),
        });

        Ok(&self.swipes[self.swipes.len() - 1])
    }

    /// Remove the most recent decision
    ///
    /// Only while incomplete; otherwise (or when empty) nothing happens.
    pub fn undo(&mut self) -> Option<SwipeRecord> {
        if self.state != SessionState::Open || self.is_complete() {
            return None;
        }
        self.swipes.pop()
    }

    pub fn is_complete(&self) -> bool {
        self.swipes.len() >= self.target_count
    }

    pub fn preferences(&self) -> Vec<bool> {
        self.swipes.iter().map(|s| s.accepted).collect()
    }

    pub fn accepted_count(&self) -> usize {
        self.swipes.iter().filter(|s| s.accepted).count()
    }

    /// Close a complete session and produce its preference record
    pub fn finalize(&mut self) -> Result<TonePreference, SessionStateError> {
        match self.state {
            SessionState::Finalized => return Err(SessionStateError::AlreadyComplete),
            SessionState::Open if !self.is_complete() => {
                return Err(SessionStateError::Incomplete {
                    recorded: self.swipes.len(),
                    target: self.target_count,
                })
            }
            SessionState::Open => {}
        }

        let now = Utc::now();
        self.state = SessionState::Finalized;
        self.finalized_at = Some(now);

        Ok(TonePreference {
            preference_id: Uuid::new_v4(),
            user_id: self.user_id,
            session_id: self.session_id,
            preferences: self.preferences(),
            samples: self.samples.clone(),
            created_at: now,
        })
    }
}
