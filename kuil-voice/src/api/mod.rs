//! HTTP API handlers for kuil-voice
//!
//! JSON REST endpoints under `/api/users/:user_id/...` plus an SSE stream of
//! domain events and a read-only view of the runtime settings.

pub mod calibration;
pub mod health;
pub mod hook_score;
pub mod posts;
pub mod settings;
pub mod sse;
pub mod users;
pub mod voice;

pub use calibration::calibration_routes;
pub use health::health_routes;
pub use hook_score::hook_score_routes;
pub use posts::post_routes;
pub use settings::settings_routes;
pub use sse::event_stream;
pub use users::user_routes;
pub use voice::voice_routes;
