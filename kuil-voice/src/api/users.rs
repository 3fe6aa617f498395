//! User registration and deletion
//!
//! Deleting a user removes every row it owns (sessions, preferences, posts,
//! calibration, observations, snapshots).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{db, ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    /// Caller-chosen id; generated when absent
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
}

/// POST /api/users
///
/// Idempotent for a given `user_id`.
pub async fn create_user(
    State(state): State<AppState>,
    request: Option<Json<CreateUserRequest>>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let user_id = request.user_id.unwrap_or_else(Uuid::new_v4);

    db::users::create_user(&state.db, user_id).await?;
    info!(%user_id, "User registered");

    Ok((StatusCode::CREATED, Json(UserResponse { user_id })))
}

/// DELETE /api/users/:user_id
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !db::users::delete_user(&state.db, user_id).await? {
        return Err(ApiError::NotFound(format!("user {}", user_id)));
    }

    info!(%user_id, "User deleted with all owned data");
    Ok(StatusCode::NO_CONTENT)
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/:user_id", delete(delete_user))
}
