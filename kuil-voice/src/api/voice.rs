//! Voice-signature endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EvolutionPhase, EvolutionState, VoiceSignatureSnapshot};
use crate::services::{CheckRequest, EvolutionOutcome};
use crate::{ApiError, ApiResult, AppState};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct SignatureResponse {
    /// Latest snapshot; None before the first evolution
    pub signature: Option<VoiceSignatureSnapshot>,
    pub evolution: EvolutionState,
    pub phase: EvolutionPhase,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EvolveRequest {
    /// `manual` (default) or `calibration`
    #[serde(default)]
    pub reason: Option<CheckRequest>,
}

/// GET /api/users/:user_id/voice-signature
pub async fn get_signature(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<SignatureResponse>> {
    let signature = state.evolution.current_signature(user_id).await?;
    let evolution = state.evolution.evolution_state(user_id).await?;

    Ok(Json(SignatureResponse {
        signature,
        evolution,
        phase: state.evolution.phase(user_id),
    }))
}

/// GET /api/users/:user_id/voice-signature/history?limit=N
///
/// Newest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<VoiceSignatureSnapshot>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.evolution.history(user_id, limit).await?))
}

/// POST /api/users/:user_id/voice-signature/evolve
///
/// 409 while a check for the user is running, 502 when the gateway fails.
pub async fn evolve(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    request: Option<Json<EvolveRequest>>,
) -> ApiResult<Json<EvolutionOutcome>> {
    let request = match request.and_then(|Json(r)| r.reason) {
        None | Some(CheckRequest::Manual) => CheckRequest::Manual,
        Some(CheckRequest::Calibration) => CheckRequest::Calibration,
        Some(CheckRequest::Scheduled) => {
            return Err(ApiError::BadRequest(
                "reason must be 'manual' or 'calibration'".to_string(),
            ))
        }
    };

    match state.evolution.check(user_id, request).await? {
        EvolutionOutcome::AlreadyInFlight => Err(ApiError::Conflict(format!(
            "voice evolution already running for user {}",
            user_id
        ))),
        EvolutionOutcome::Deferred { reason } => Err(ApiError::Upstream(reason)),
        outcome => Ok(Json(outcome)),
    }
}

pub fn voice_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/:user_id/voice-signature", get(get_signature))
        .route("/api/users/:user_id/voice-signature/history", get(get_history))
        .route("/api/users/:user_id/voice-signature/evolve", post(evolve))
}
