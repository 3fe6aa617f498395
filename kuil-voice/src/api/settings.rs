//! Runtime settings endpoint
//!
//! Read-only view of the tunables loaded at startup. Values change by editing
//! the `settings` table and restarting the service.

use axum::{extract::State, routing::get, Json, Router};

use crate::config::RuntimeSettings;
use crate::AppState;

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<RuntimeSettings> {
    Json(state.settings.as_ref().clone())
}

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/api/settings", get(get_settings))
}
