//! Published post and engagement capture endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::models::EngagementMetrics;
use crate::services::{CheckRequest, NewPost, ObservationOutcome, RecordedPost};
use crate::{ApiResult, AppState};

/// POST /api/users/:user_id/posts
///
/// When the post brings the evolution counter to the threshold, an evolution
/// check is started in the background.
pub async fn record_post(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(new_post): Json<NewPost>,
) -> ApiResult<(StatusCode, Json<RecordedPost>)> {
    let recorded = state.evolution.record_post(user_id, new_post).await?;

    if recorded.evolution_due {
        let evolution = Arc::clone(&state.evolution);
        let app_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = evolution.check(user_id, CheckRequest::Scheduled).await {
                warn!(%user_id, error = %e, "Background evolution check failed");
                app_state
                    .record_error(format!("evolution check for {}: {}", user_id, e))
                    .await;
            }
        });
    }

    Ok((StatusCode::CREATED, Json(recorded)))
}

/// POST /api/users/:user_id/posts/:post_id/engagement
///
/// A repeated capture for the same post is a no-op answered with 200 and
/// `"stored": false`.
pub async fn capture_engagement(
    State(state): State<AppState>,
    Path((user_id, post_id)): Path<(Uuid, Uuid)>,
    Json(metrics): Json<EngagementMetrics>,
) -> ApiResult<(StatusCode, Json<ObservationOutcome>)> {
    let outcome = state
        .hook_calibrator
        .capture_engagement(user_id, post_id, metrics)
        .await?;

    let status = if outcome.stored {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

pub fn post_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/:user_id/posts", post(record_post))
        .route(
            "/api/users/:user_id/posts/:post_id/engagement",
            post(capture_engagement),
        )
}
