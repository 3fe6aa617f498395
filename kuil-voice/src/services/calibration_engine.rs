//! Tone-calibration engine
//!
//! Runs swipe sessions: fetch sample posts, record ordered accept/reject
//! decisions and persist them as a tone preference once the target count is
//! reached. No preference score is derived here; consumers read the raw list.

use chrono::Utc;
use kuil_common::events::{EventBus, KuilEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{CalibrationResult, SessionStateError};
use crate::models::{CalibrationSession, SamplePost, SessionState, SwipeRecord, TonePreference};
use crate::services::llm_gateway::{calibration_samples_prompt, with_timeout, LlmGateway};
use crate::services::sample_posts::built_in_samples_for;
use crate::utils::retry_on_lock;

/// Result of one recorded swipe
#[derive(Debug, Clone)]
pub struct SwipeOutcome {
    pub session: CalibrationSession,
    pub swipe: SwipeRecord,
    /// Present when this swipe completed the session
    pub preference: Option<TonePreference>,
}

pub struct CalibrationEngine {
    db: SqlitePool,
    gateway: Arc<dyn LlmGateway>,
    event_bus: EventBus,
    target_count: usize,
    gateway_timeout: Duration,
    max_lock_wait_ms: u64,
}

impl CalibrationEngine {
    pub fn new(
        db: SqlitePool,
        gateway: Arc<dyn LlmGateway>,
        event_bus: EventBus,
        target_count: usize,
        gateway_timeout: Duration,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            gateway,
            event_bus,
            target_count: target_count.max(1),
            gateway_timeout,
            max_lock_wait_ms,
        }
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Open a session, or return the one already open
    pub async fn start_session(&self, user_id: Uuid) -> CalibrationResult<CalibrationSession> {
        db::users::require_user(&self.db, user_id).await?;

        if let Some(existing) = db::calibration::load_open_session(&self.db, user_id).await? {
            debug!(%user_id, session_id = %existing.session_id, "Returning open calibration session");
            return Ok(existing);
        }

        let (samples, used_fallback) = self.fetch_samples(user_id).await;
        let session = CalibrationSession::new(user_id, samples, self.target_count);

        let inserted = retry_on_lock("insert_calibration_session", self.max_lock_wait_ms, || {
            db::calibration::insert_session(&self.db, &session)
        })
        .await;

        if let Err(err) = inserted {
            // A concurrent start may have won the single-open-session index
            if let Some(existing) = db::calibration::load_open_session(&self.db, user_id).await? {
                return Ok(existing);
            }
            return Err(err.into());
        }

        info!(
            %user_id,
            session_id = %session.session_id,
            target_count = session.target_count,
            used_fallback,
            "Calibration session started"
        );

        self.event_bus.emit_lossy(KuilEvent::CalibrationSessionStarted {
            user_id,
            session_id: session.session_id,
            target_count: session.target_count,
            used_fallback_samples: used_fallback,
            timestamp: Utc::now(),
        });

        Ok(session)
    }

    /// Samples for a new session; falls back to the built-in set on any
    /// gateway failure or short reply
    async fn fetch_samples(&self, user_id: Uuid) -> (Vec<SamplePost>, bool) {
        let target = self.target_count;
        let prompt = calibration_samples_prompt(target);

        match with_timeout(self.gateway_timeout, self.gateway.generate_variants(&prompt, target)).await
        {
            Ok(variants) if variants.len() >= target => {
                let samples = variants
                    .into_iter()
                    .take(target)
                    .filter(|v| !v.content.trim().is_empty())
                    .enumerate()
                    .map(|(i, v)| SamplePost {
                        sample_post_id: format!("gen-{:02}-{}", i + 1, Uuid::new_v4().simple()),
                        tone_label: v.tone_label,
                        content: v.content,
                    })
                    .collect::<Vec<_>>();

                if samples.len() >= target {
                    return (samples, false);
                }
                warn!(%user_id, "Gateway returned blank samples, using built-in set");
            }
            Ok(variants) => {
                warn!(
                    %user_id,
                    received = variants.len(),
                    target,
                    "Gateway returned too few samples, using built-in set"
                );
            }
            Err(e) => {
                warn!(%user_id, gateway = self.gateway.name(), error = %e, "Sample generation failed, using built-in set");
            }
        }

        (built_in_samples_for(target), true)
    }

    /// Append a decision for the next sample
    ///
    /// The swipe that reaches the target also finalizes the session and writes
    /// its tone preference in the same transaction.
    pub async fn record_swipe(&self, user_id: Uuid, accepted: bool) -> CalibrationResult<SwipeOutcome> {
        let mut session = match db::calibration::load_open_session(&self.db, user_id).await? {
            Some(session) => session,
            None => return Err(self.no_open_session_error(user_id).await?.into()),
        };

        let swipe = session.record_swipe(accepted)?.clone();
        let position = session.swipes.len() - 1;

        let preference = if session.is_complete() {
            Some(session.finalize()?)
        } else {
            None
        };

        retry_on_lock("save_calibration_swipe", self.max_lock_wait_ms, || {
            db::calibration::save_latest_swipe(&self.db, &session, preference.as_ref())
        })
        .await?;

        debug!(%user_id, session_id = %session.session_id, position, accepted, "Swipe recorded");

        self.event_bus.emit_lossy(KuilEvent::CalibrationSwipeRecorded {
            user_id,
            session_id: session.session_id,
            position,
            accepted,
            timestamp: swipe.swiped_at,
        });

        if preference.is_some() {
            info!(
                %user_id,
                session_id = %session.session_id,
                accepted = session.accepted_count(),
                total = session.swipes.len(),
                "Calibration session completed"
            );
            self.event_bus.emit_lossy(KuilEvent::CalibrationSessionCompleted {
                user_id,
                session_id: session.session_id,
                accepted_count: session.accepted_count(),
                total: session.swipes.len(),
                timestamp: Utc::now(),
            });
        }

        Ok(SwipeOutcome {
            session,
            swipe,
            preference,
        })
    }

    /// Completed sessions reject further swipes as AlreadyComplete; otherwise
    /// nothing was started
    async fn no_open_session_error(&self, user_id: Uuid) -> CalibrationResult<SessionStateError> {
        let latest = db::calibration::load_latest_session(&self.db, user_id).await?;
        Ok(match latest {
            Some(session) if session.state == SessionState::Finalized => {
                SessionStateError::AlreadyComplete
            }
            _ => SessionStateError::NotStarted,
        })
    }

    /// True once the most recent session reached its target
    pub async fn is_complete(&self, user_id: Uuid) -> CalibrationResult<bool> {
        let latest = db::calibration::load_latest_session(&self.db, user_id).await?;
        Ok(latest.map(|s| s.is_complete()).unwrap_or(false))
    }

    /// Remove the most recent swipe of an incomplete session
    ///
    /// No session, no swipes or a finished session: nothing happens.
    pub async fn undo(&self, user_id: Uuid) -> CalibrationResult<Option<SwipeRecord>> {
        let Some(mut session) = db::calibration::load_open_session(&self.db, user_id).await? else {
            return Ok(None);
        };

        let Some(removed) = session.undo() else {
            return Ok(None);
        };
        let position = session.swipes.len();

        retry_on_lock("delete_calibration_swipe", self.max_lock_wait_ms, || {
            db::calibration::delete_swipe(&self.db, session.session_id, position)
        })
        .await?;

        debug!(%user_id, session_id = %session.session_id, position, "Swipe undone");
        Ok(Some(removed))
    }

    /// Discard the open session; returns whether one existed
    pub async fn cancel(&self, user_id: Uuid) -> CalibrationResult<bool> {
        let Some(session) = db::calibration::load_open_session(&self.db, user_id).await? else {
            return Ok(false);
        };

        let deleted = db::calibration::delete_open_session(&self.db, session.session_id).await?;
        if deleted {
            info!(%user_id, session_id = %session.session_id, "Calibration session cancelled");
            self.event_bus.emit_lossy(KuilEvent::CalibrationSessionCancelled {
                user_id,
                session_id: session.session_id,
                timestamp: Utc::now(),
            });
        }
        Ok(deleted)
    }

    /// The open session if any, else the most recent finished one
    pub async fn current_session(&self, user_id: Uuid) -> CalibrationResult<Option<CalibrationSession>> {
        db::users::require_user(&self.db, user_id).await?;
        Ok(db::calibration::load_latest_session(&self.db, user_id).await?)
    }

    pub async fn latest_preferences(&self, user_id: Uuid) -> CalibrationResult<Option<TonePreference>> {
        db::users::require_user(&self.db, user_id).await?;
        Ok(db::calibration::load_latest_preference(&self.db, user_id).await?)
    }
}
