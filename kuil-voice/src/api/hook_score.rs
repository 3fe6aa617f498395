//! Hook-score calibration endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::services::{CalibratedScore, CalibrationSummary, ObservationOutcome, RefitOutcome};
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ObservationRequest {
    pub predicted: i64,
    pub actual: i64,
}

#[derive(Debug, Deserialize)]
pub struct HookScoreQuery {
    pub raw: i64,
}

/// GET /api/users/:user_id/hook-calibration
pub async fn get_calibration(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<CalibrationSummary>> {
    Ok(Json(state.hook_calibrator.calibration(user_id).await?))
}

/// POST /api/users/:user_id/hook-calibration/observations
pub async fn record_observation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ObservationRequest>,
) -> ApiResult<(StatusCode, Json<ObservationOutcome>)> {
    let outcome = state
        .hook_calibrator
        .record_observation(user_id, request.predicted, request.actual)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /api/users/:user_id/hook-calibration/refit
///
/// Underdetermined data answers 200 with `"status": "skipped"`.
pub async fn refit(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<RefitOutcome>> {
    Ok(Json(state.hook_calibrator.refit(user_id).await?))
}

/// GET /api/users/:user_id/hook-score?raw=N
pub async fn get_hook_score(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<HookScoreQuery>,
) -> ApiResult<Json<CalibratedScore>> {
    Ok(Json(
        state
            .hook_calibrator
            .calibrated_score(user_id, query.raw)
            .await?,
    ))
}

pub fn hook_score_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/:user_id/hook-calibration", get(get_calibration))
        .route(
            "/api/users/:user_id/hook-calibration/observations",
            post(record_observation),
        )
        .route("/api/users/:user_id/hook-calibration/refit", post(refit))
        .route("/api/users/:user_id/hook-score", get(get_hook_score))
}
