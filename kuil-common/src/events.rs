//! Event types for the Kuil event system
//!
//! Provides shared event definitions and the EventBus. Services return typed
//! results to their callers; events are an additional broadcast for observers
//! such as the SSE stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kuil event types
///
/// Broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KuilEvent {
    /// A tone-calibration session was opened
    CalibrationSessionStarted {
        user_id: Uuid,
        session_id: Uuid,
        target_count: usize,
        /// True when the built-in sample set replaced generated samples
        used_fallback_samples: bool,
        timestamp: DateTime<Utc>,
    },

    /// One swipe decision was appended to a session
    CalibrationSwipeRecorded {
        user_id: Uuid,
        session_id: Uuid,
        position: usize,
        accepted: bool,
        timestamp: DateTime<Utc>,
    },

    /// A session reached its target length and its preferences were persisted
    CalibrationSessionCompleted {
        user_id: Uuid,
        session_id: Uuid,
        accepted_count: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// An open session was discarded before completion
    CalibrationSessionCancelled {
        user_id: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Hook-score regression produced a new (factor, bias) pair
    HookCalibrationRefit {
        user_id: Uuid,
        factor: f64,
        bias: f64,
        r_squared: f64,
        sample_size: usize,
        timestamp: DateTime<Utc>,
    },

    /// A new voice-signature snapshot was stored
    VoiceSignatureEvolved {
        user_id: Uuid,
        snapshot_id: Uuid,
        trigger_reason: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A due evolution could not complete and will be retried next cycle
    VoiceEvolutionDeferred {
        user_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl KuilEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            KuilEvent::CalibrationSessionStarted { .. } => "CalibrationSessionStarted",
            KuilEvent::CalibrationSwipeRecorded { .. } => "CalibrationSwipeRecorded",
            KuilEvent::CalibrationSessionCompleted { .. } => "CalibrationSessionCompleted",
            KuilEvent::CalibrationSessionCancelled { .. } => "CalibrationSessionCancelled",
            KuilEvent::HookCalibrationRefit { .. } => "HookCalibrationRefit",
            KuilEvent::VoiceSignatureEvolved { .. } => "VoiceSignatureEvolved",
            KuilEvent::VoiceEvolutionDeferred { .. } => "VoiceEvolutionDeferred",
        }
    }

    /// Owning user of the event
    pub fn user_id(&self) -> Uuid {
        match self {
            KuilEvent::CalibrationSessionStarted { user_id, .. }
            | KuilEvent::CalibrationSwipeRecorded { user_id, .. }
            | KuilEvent::CalibrationSessionCompleted { user_id, .. }
            | KuilEvent::CalibrationSessionCancelled { user_id, .. }
            | KuilEvent::HookCalibrationRefit { user_id, .. }
            | KuilEvent::VoiceSignatureEvolved { user_id, .. }
            | KuilEvent::VoiceEvolutionDeferred { user_id, .. } => *user_id,
        }
    }
}

/// Broadcast bus for KuilEvent
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KuilEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow receivers lag and lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<KuilEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: KuilEvent) -> Result<usize, broadcast::error::SendError<KuilEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KuilEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscriber() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let user_id = Uuid::new_v4();

        bus.emit(KuilEvent::CalibrationSessionCancelled {
            user_id,
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "CalibrationSessionCancelled");
        assert_eq!(event.user_id(), user_id);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        let event = KuilEvent::VoiceEvolutionDeferred {
            user_id: Uuid::new_v4(),
            reason: "timeout".to_string(),
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        // Lossy emit never fails
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 10);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = KuilEvent::HookCalibrationRefit {
            user_id: Uuid::nil(),
            factor: 1.1,
            bias: -3.0,
            r_squared: 0.8,
            sample_size: 7,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "HookCalibrationRefit");
        assert_eq!(json["sample_size"], 7);
    }
}
