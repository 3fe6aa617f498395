//! Shared test fixtures: in-memory database, scripted gateway, app state

#![allow(dead_code)]

use async_trait::async_trait;
use kuil_common::events::EventBus;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use kuil_voice::config::RuntimeSettings;
use kuil_voice::models::{PublishedPost, ToneDimensions};
use kuil_voice::services::llm_gateway::{GeneratedVariant, VoiceAnalysis};
use kuil_voice::services::{GatewayError, LlmGateway, NewPost, VoiceEvolution};
use kuil_voice::AppState;

/// In-memory database with the full schema
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    kuil_common::db::init::create_schema(&pool)
        .await
        .expect("Failed to create schema");
    pool
}

pub fn test_settings() -> RuntimeSettings {
    RuntimeSettings {
        llm_timeout: Duration::from_secs(2),
        db_max_lock_wait_ms: 500,
        ..RuntimeSettings::default()
    }
}

pub async fn create_user(pool: &SqlitePool) -> Uuid {
    let user_id = Uuid::new_v4();
    kuil_voice::db::users::create_user(pool, user_id)
        .await
        .expect("Failed to create user");
    user_id
}

pub fn analysis(value: f64, tone: &str, confidence: f64) -> VoiceAnalysis {
    VoiceAnalysis {
        dimensions: ToneDimensions {
            formal: value,
            bold: value,
            empathetic: value,
            complexity: value,
            brevity: value,
        },
        primary_tone: tone.to_string(),
        confidence,
    }
}

pub fn variants(count: usize) -> Vec<GeneratedVariant> {
    (0..count)
        .map(|i| GeneratedVariant {
            tone_label: format!("tone-{}", i % 4),
            content: format!("Generated sample post number {}", i + 1),
        })
        .collect()
}

/// Gateway whose replies are set by the test
pub struct FakeGateway {
    variants: Mutex<Result<Vec<GeneratedVariant>, GatewayError>>,
    analysis: Mutex<Result<VoiceAnalysis, GatewayError>>,
    analysis_delay: Mutex<Option<Duration>>,
    hold_analysis: Mutex<bool>,
    release: Notify,
    analyze_calls: AtomicUsize,
}

impl FakeGateway {
    /// Generation fails, analysis succeeds with a neutral profile
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            variants: Mutex::new(Err(GatewayError::NotConfigured)),
            analysis: Mutex::new(Ok(analysis(5.0, "balanced", 0.8))),
            analysis_delay: Mutex::new(None),
            hold_analysis: Mutex::new(false),
            release: Notify::new(),
            analyze_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_variants(&self, reply: Result<Vec<GeneratedVariant>, GatewayError>) {
        *self.variants.lock().unwrap() = reply;
    }

    pub fn set_analysis(&self, reply: Result<VoiceAnalysis, GatewayError>) {
        *self.analysis.lock().unwrap() = reply;
    }

    pub fn set_analysis_delay(&self, delay: Option<Duration>) {
        *self.analysis_delay.lock().unwrap() = delay;
    }

    /// Make analyze_voice wait until `release_analysis` is called
    pub fn hold_analysis(&self) {
        *self.hold_analysis.lock().unwrap() = true;
    }

    pub fn release_analysis(&self) {
        *self.hold_analysis.lock().unwrap() = false;
        self.release.notify_one();
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate_variants(
        &self,
        _prompt: &str,
        _count: usize,
    ) -> Result<Vec<GeneratedVariant>, GatewayError> {
        self.variants.lock().unwrap().clone()
    }

    async fn analyze_voice(&self, _posts: &[PublishedPost]) -> Result<VoiceAnalysis, GatewayError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);

        let held = *self.hold_analysis.lock().unwrap();
        if held {
            self.release.notified().await;
        }

        let delay = *self.analysis_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.analysis.lock().unwrap().clone()
    }
}

/// App state over a fresh in-memory database
pub async fn test_state(gateway: Arc<FakeGateway>, settings: RuntimeSettings) -> AppState {
    let pool = test_pool().await;
    AppState::new(pool, EventBus::new(100), settings, gateway)
}

pub fn post(content: &str, predicted: Option<i64>) -> NewPost {
    NewPost {
        content: content.to_string(),
        tone_label: Some("bold".to_string()),
        predicted_hook_score: predicted,
        published_at: None,
    }
}

pub async fn publish_posts(evolution: &VoiceEvolution, user_id: Uuid, count: usize) {
    for i in 0..count {
        evolution
            .record_post(user_id, post(&format!("Published post {}", i + 1), Some(50)))
            .await
            .expect("Failed to record post");
    }
}
