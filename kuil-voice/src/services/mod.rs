//! Service modules for kuil-voice
//!
//! - `calibration_engine`: swipe sessions and tone preferences
//! - `hook_calibrator`: per-user hook-score regression
//! - `voice_evolution`: voice-signature snapshots and their triggers
//! - `scheduler`: periodic evolution checks
//! - `llm_gateway`: sample generation and voice analysis

pub mod calibration_engine;
pub mod hook_calibrator;
pub mod llm_gateway;
pub mod sample_posts;
pub mod scheduler;
pub mod voice_evolution;

pub use calibration_engine::{CalibrationEngine, SwipeOutcome};
pub use hook_calibrator::{
    CalibratedScore, CalibrationSummary, HookCalibrator, ObservationOutcome, RefitOutcome,
};
pub use llm_gateway::{AnthropicGateway, GatewayError, LlmGateway, UnconfiguredGateway};
pub use scheduler::{CycleSummary, EvolutionScheduler};
pub use voice_evolution::{CheckRequest, EvolutionOutcome, NewPost, RecordedPost, VoiceEvolution};
