//! Tone-calibration session endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::models::{CalibrationSession, SamplePost, SessionState, SwipeRecord, TonePreference};
use crate::services::CheckRequest;
use crate::{ApiError, ApiResult, AppState};

/// Session as presented to the client
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: SessionState,
    pub target_count: usize,
    pub swipes_recorded: usize,
    pub is_complete: bool,
    pub next_sample: Option<SamplePost>,
    pub samples: Vec<SamplePost>,
    pub preferences: Vec<bool>,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl From<CalibrationSession> for SessionView {
    fn from(session: CalibrationSession) -> Self {
        Self {
            session_id: session.session_id,
            state: session.state,
            target_count: session.target_count,
            swipes_recorded: session.swipes.len(),
            is_complete: session.is_complete(),
            next_sample: session.next_sample().cloned(),
            preferences: session.preferences(),
            started_at: session.started_at,
            finalized_at: session.finalized_at,
            samples: session.samples,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CalibrationStatus {
    pub session: Option<SessionView>,
    pub is_complete: bool,
}

#[derive(Debug, Deserialize)]
pub struct SwipeRequest {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct SwipeResponse {
    pub session: SessionView,
    pub swipe: SwipeRecord,
    pub completed: bool,
    pub preference: Option<TonePreference>,
}

#[derive(Debug, Serialize)]
pub struct UndoResponse {
    /// None when there was nothing to undo
    pub undone: Option<SwipeRecord>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// POST /api/users/:user_id/calibration/start
pub async fn start_session(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    let session = state.calibration.start_session(user_id).await?;
    Ok(Json(session.into()))
}

/// POST /api/users/:user_id/calibration/swipe
///
/// 409 when no session is open or the session is already complete. The swipe
/// that completes the session starts a calibration-triggered evolution check
/// in the background.
pub async fn record_swipe(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<SwipeRequest>,
) -> ApiResult<Json<SwipeResponse>> {
    let outcome = state.calibration.record_swipe(user_id, request.accepted).await?;

    if outcome.preference.is_some() {
        let evolution = Arc::clone(&state.evolution);
        let app_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = evolution.check(user_id, CheckRequest::Calibration).await {
                warn!(%user_id, error = %e, "Calibration-triggered evolution check failed");
                app_state
                    .record_error(format!("evolution check for {}: {}", user_id, e))
                    .await;
            }
        });
    }

    Ok(Json(SwipeResponse {
        completed: outcome.preference.is_some(),
        session: outcome.session.into(),
        swipe: outcome.swipe,
        preference: outcome.preference,
    }))
}

/// POST /api/users/:user_id/calibration/undo
pub async fn undo_swipe(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<UndoResponse>> {
    let undone = state.calibration.undo(user_id).await?;
    Ok(Json(UndoResponse { undone }))
}

/// POST /api/users/:user_id/calibration/cancel
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state.calibration.cancel(user_id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

/// GET /api/users/:user_id/calibration
pub async fn get_status(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<CalibrationStatus>> {
    let session = state.calibration.current_session(user_id).await?;
    let is_complete = session.as_ref().map(|s| s.is_complete()).unwrap_or(false);

    Ok(Json(CalibrationStatus {
        session: session.map(SessionView::from),
        is_complete,
    }))
}

/// GET /api/users/:user_id/calibration/preferences
pub async fn get_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<TonePreference>> {
    state
        .calibration
        .latest_preferences(user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no tone preferences for user {}", user_id)))
}

pub fn calibration_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/:user_id/calibration", get(get_status))
        .route("/api/users/:user_id/calibration/start", post(start_session))
        .route("/api/users/:user_id/calibration/swipe", post(record_swipe))
        .route("/api/users/:user_id/calibration/undo", post(undo_swipe))
        .route("/api/users/:user_id/calibration/cancel", post(cancel_session))
        .route("/api/users/:user_id/calibration/preferences", get(get_preferences))
}
