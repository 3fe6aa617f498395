//! Data models for kuil-voice

pub mod calibration_session;
pub mod hook_calibration;
pub mod post;
pub mod voice_signature;

pub use calibration_session::{CalibrationSession, SamplePost, SessionState, SwipeRecord, TonePreference};
pub use hook_calibration::{
    CalibrationFit, EngagementBand, EngagementFeedback, EngagementMetrics, HookCalibration,
};
pub use post::PublishedPost;
pub use voice_signature::{
    EvolutionPhase, EvolutionState, ToneDimensions, TriggerReason, VoiceSignatureSnapshot,
};
