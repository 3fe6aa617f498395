//! Voice-signature evolution
//!
//! Per-user state machine IDLE → CHECK_DUE → ANALYZING → SNAPSHOTTING → IDLE.
//! A check decides whether a re-analysis is due, asks the gateway to analyse
//! the most recent posts and stores the result as a new snapshot. Gateway
//! failures leave everything untouched; the next scheduled check retries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kuil_common::events::{EventBus, KuilEvent};
use kuil_common::Error;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RuntimeSettings;
use crate::db;
use crate::error::CalibrationResult;
use crate::models::{
    EvolutionPhase, EvolutionState, PublishedPost, TriggerReason, VoiceSignatureSnapshot,
};
use crate::services::llm_gateway::{with_timeout, LlmGateway};
use crate::utils::retry_on_lock;

/// What asked for the check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckRequest {
    /// Scheduler tick or post-volume follow-up
    Scheduled,
    /// User asked for a re-analysis
    Manual,
    /// Follow-up to a completed tone calibration
    Calibration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvolutionOutcome {
    NotDue,
    AlreadyInFlight,
    NothingToAnalyze,
    Evolved { snapshot: VoiceSignatureSnapshot },
    /// Gateway failed; counter unchanged, retried on the next scheduled check
    Deferred { reason: String },
}

/// Decide whether a check should proceed to analysis
///
/// Explicit requests always proceed. Otherwise the first-ever signature,
/// then post volume, then elapsed time (with at least one new post).
pub fn decide_trigger(
    request: CheckRequest,
    state: &EvolutionState,
    has_snapshot: bool,
    now: DateTime<Utc>,
    threshold: u32,
    period_days: i64,
) -> Option<TriggerReason> {
    match request {
        CheckRequest::Manual => return Some(TriggerReason::Manual),
        CheckRequest::Calibration => return Some(TriggerReason::Calibration),
        CheckRequest::Scheduled => {}
    }

    if !has_snapshot {
        return Some(TriggerReason::Initial);
    }

    if state.posts_since_last_evolution >= threshold {
        return Some(TriggerReason::Threshold);
    }

    let period_elapsed = match (state.last_evolved_at, ChronoDuration::try_days(period_days)) {
        (None, _) => true,
        (Some(last), Some(period)) => now - last >= period,
        // Period beyond the representable range never elapses
        (Some(_), None) => false,
    };
    if period_elapsed && state.posts_since_last_evolution > 0 {
        return Some(TriggerReason::Periodic);
    }

    None
}

/// A post to record, as submitted by the caller
#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub content: String,
    #[serde(default)]
    pub tone_label: Option<String>,
    #[serde(default)]
    pub predicted_hook_score: Option<i64>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedPost {
    pub post: PublishedPost,
    pub posts_since_last_evolution: u32,
    /// Counter reached the evolution threshold
    pub evolution_due: bool,
}

/// Removes the user's in-flight entry when the check ends, however it ends
struct InFlightGuard<'a> {
    phases: &'a Mutex<HashMap<Uuid, EvolutionPhase>>,
    user_id: Uuid,
}

impl InFlightGuard<'_> {
    fn set(&self, phase: EvolutionPhase) {
        let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        phases.insert(self.user_id, phase);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        phases.remove(&self.user_id);
    }
}

pub struct VoiceEvolution {
    db: SqlitePool,
    gateway: Arc<dyn LlmGateway>,
    event_bus: EventBus,
    threshold: u32,
    period_days: i64,
    recent_posts: usize,
    gateway_timeout: Duration,
    max_lock_wait_ms: u64,
    phases: Mutex<HashMap<Uuid, EvolutionPhase>>,
}

impl VoiceEvolution {
    pub fn new(
        db: SqlitePool,
        gateway: Arc<dyn LlmGateway>,
        event_bus: EventBus,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            db,
            gateway,
            event_bus,
            threshold: settings.evolution_threshold,
            period_days: settings.evolution_period_days,
            recent_posts: settings.evolution_recent_posts,
            gateway_timeout: settings.llm_timeout,
            max_lock_wait_ms: settings.db_max_lock_wait_ms,
            phases: Mutex::new(HashMap::new()),
        }
    }

    /// Current phase for the user (Idle when no check is running)
    pub fn phase(&self, user_id: Uuid) -> EvolutionPhase {
        let phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        phases.get(&user_id).copied().unwrap_or(EvolutionPhase::Idle)
    }

    fn try_begin(&self, user_id: Uuid) -> Option<InFlightGuard<'_>> {
        let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        if phases.contains_key(&user_id) {
            return None;
        }
        phases.insert(user_id, EvolutionPhase::CheckDue);
        Some(InFlightGuard {
            phases: &self.phases,
            user_id,
        })
    }

    /// Record a published post and bump the evolution counter
    pub async fn record_post(&self, user_id: Uuid, new_post: NewPost) -> CalibrationResult<RecordedPost> {
        if new_post.content.trim().is_empty() {
            return Err(Error::InvalidInput("post content must not be empty".to_string()).into());
        }
        let predicted_hook_score = match new_post.predicted_hook_score {
            Some(score) if (0..=100).contains(&score) => Some(score as u8),
            Some(score) => {
                return Err(Error::InvalidInput(format!(
                    "predicted_hook_score must be within 0..=100, got {}",
                    score
                ))
                .into())
            }
            None => None,
        };

        db::users::require_user(&self.db, user_id).await?;

        let post = PublishedPost {
            post_id: Uuid::new_v4(),
            user_id,
            content: new_post.content,
            tone_label: new_post.tone_label,
            predicted_hook_score,
            published_at: new_post.published_at.unwrap_or_else(Utc::now),
        };

        let counter = retry_on_lock("insert_published_post", self.max_lock_wait_ms, || {
            db::posts::insert_post(&self.db, &post)
        })
        .await?;

        debug!(%user_id, post_id = %post.post_id, posts_since_last_evolution = counter, "Post recorded");

        Ok(RecordedPost {
            post,
            posts_since_last_evolution: counter,
            evolution_due: counter >= self.threshold,
        })
    }

    pub async fn current_signature(
        &self,
        user_id: Uuid,
    ) -> CalibrationResult<Option<VoiceSignatureSnapshot>> {
        db::users::require_user(&self.db, user_id).await?;
        Ok(db::voice::latest_snapshot(&self.db, user_id).await?)
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> CalibrationResult<Vec<VoiceSignatureSnapshot>> {
        db::users::require_user(&self.db, user_id).await?;
        Ok(db::voice::list_snapshots(&self.db, user_id, limit).await?)
    }

    pub async fn evolution_state(&self, user_id: Uuid) -> CalibrationResult<EvolutionState> {
        Ok(db::voice::load_evolution_state(&self.db, user_id).await?)
    }

    /// Run one evolution check for the user
    ///
    /// A check for a user whose previous check is still running returns
    /// `AlreadyInFlight` without touching anything.
    pub async fn check(&self, user_id: Uuid, request: CheckRequest) -> CalibrationResult<EvolutionOutcome> {
        let Some(guard) = self.try_begin(user_id) else {
            debug!(%user_id, ?request, "Evolution check already in flight");
            return Ok(EvolutionOutcome::AlreadyInFlight);
        };

        db::users::require_user(&self.db, user_id).await?;

        let state = db::voice::load_evolution_state(&self.db, user_id).await?;
        let previous = db::voice::latest_snapshot(&self.db, user_id).await?;

        let Some(reason) = decide_trigger(
            request,
            &state,
            previous.is_some(),
            Utc::now(),
            self.threshold,
            self.period_days,
        ) else {
            return Ok(EvolutionOutcome::NotDue);
        };

        guard.set(EvolutionPhase::Analyzing);

        let posts = db::posts::recent_posts(&self.db, user_id, self.recent_posts).await?;
        if posts.is_empty() {
            debug!(%user_id, %reason, "No published posts to analyse");
            return Ok(EvolutionOutcome::NothingToAnalyze);
        }

        let analysis =
            match with_timeout(self.gateway_timeout, self.gateway.analyze_voice(&posts)).await {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(
                        %user_id,
                        %reason,
                        gateway = self.gateway.name(),
                        error = %e,
                        "Voice analysis failed, evolution deferred to next check"
                    );
                    self.event_bus.emit_lossy(KuilEvent::VoiceEvolutionDeferred {
                        user_id,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Ok(EvolutionOutcome::Deferred {
                        reason: e.to_string(),
                    });
                }
            };

        guard.set(EvolutionPhase::Snapshotting);

        let dimensions = analysis.dimensions.clamped();
        let confidence = if analysis.confidence.is_nan() {
            0.0
        } else {
            analysis.confidence.clamp(0.0, 1.0)
        };
        let primary_tone = match analysis.primary_tone.trim() {
            "" => "unknown".to_string(),
            tone => tone.to_string(),
        };

        let snapshot = VoiceSignatureSnapshot {
            snapshot_id: Uuid::new_v4(),
            user_id,
            dimensions,
            primary_tone,
            confidence,
            trigger_reason: reason,
            deltas: previous.as_ref().map(|p| dimensions.delta_from(&p.dimensions)),
            analyzed_post_count: posts.len(),
            created_at: Utc::now(),
        };

        retry_on_lock("save_voice_snapshot", self.max_lock_wait_ms, || {
            db::voice::save_snapshot(&self.db, &snapshot, state.posts_since_last_evolution)
        })
        .await?;

        info!(
            %user_id,
            snapshot_id = %snapshot.snapshot_id,
            %reason,
            primary_tone = %snapshot.primary_tone,
            confidence = snapshot.confidence,
            analyzed_posts = snapshot.analyzed_post_count,
            "Voice signature evolved"
        );

        self.event_bus.emit_lossy(KuilEvent::VoiceSignatureEvolved {
            user_id,
            snapshot_id: snapshot.snapshot_id,
            trigger_reason: reason.to_string(),
            confidence: snapshot.confidence,
            timestamp: snapshot.created_at,
        });

        drop(guard);
        Ok(EvolutionOutcome::Evolved { snapshot })
    }
}
