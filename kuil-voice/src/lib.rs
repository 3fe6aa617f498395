//! kuil-voice library interface
//!
//! Tone calibration, hook-score calibration and voice-signature evolution,
//! exposed over HTTP. The library surface is what the binary and the
//! integration tests build on.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use kuil_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::RuntimeSettings;
use crate::services::{CalibrationEngine, HookCalibrator, LlmGateway, VoiceEvolution};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Runtime settings in effect, served by /api/settings
    pub settings: Arc<RuntimeSettings>,
    pub calibration: Arc<CalibrationEngine>,
    pub hook_calibrator: Arc<HookCalibrator>,
    pub evolution: Arc<VoiceEvolution>,
    /// Gateway identifier reported by /health
    pub gateway_name: &'static str,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        settings: RuntimeSettings,
        gateway: Arc<dyn LlmGateway>,
    ) -> Self {
        let calibration = CalibrationEngine::new(
            db.clone(),
            Arc::clone(&gateway),
            event_bus.clone(),
            settings.calibration_target_count,
            settings.llm_timeout,
            settings.db_max_lock_wait_ms,
        );
        let hook_calibrator = HookCalibrator::new(db.clone(), event_bus.clone(), &settings);
        let evolution =
            VoiceEvolution::new(db.clone(), Arc::clone(&gateway), event_bus.clone(), &settings);

        Self {
            db,
            event_bus,
            settings: Arc::new(settings),
            calibration: Arc::new(calibration),
            hook_calibrator: Arc::new(hook_calibrator),
            evolution: Arc::new(evolution),
            gateway_name: gateway.name(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember a background failure for /health
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::user_routes())
        .merge(api::calibration_routes())
        .merge(api::hook_score_routes())
        .merge(api::post_routes())
        .merge(api::voice_routes())
        .merge(api::settings_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
