//! LLM Gateway client
//!
//! The gateway generates calibration sample posts and analyses a user's
//! published posts into a voice signature. Every call is bounded by a timeout;
//! any non-2xx status, undecodable reply or timeout is a `GatewayError`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{PublishedPost, ToneDimensions};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("kuil-voice/", env!("CARGO_PKG_VERSION"));
const RATE_LIMIT_MS: u64 = 500;
const MAX_TOKENS: u32 = 4096;
/// Characters of each post forwarded for voice analysis
const POST_EXCERPT_CHARS: usize = 1500;

/// LLM Gateway errors
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("LLM Gateway not configured")]
    NotConfigured,
}

/// One generated post variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedVariant {
    #[serde(alias = "tone")]
    pub tone_label: String,
    pub content: String,
}

/// Voice analysis result as returned by the gateway (unclamped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceAnalysis {
    #[serde(flatten)]
    pub dimensions: ToneDimensions,
    pub primary_tone: String,
    pub confidence: f64,
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Gateway identifier for logs
    fn name(&self) -> &'static str;

    /// Generate `count` post variants for `prompt`
    async fn generate_variants(
        &self,
        prompt: &str,
        count: usize,
    ) -> Result<Vec<GeneratedVariant>, GatewayError>;

    /// Analyse published posts into a voice signature
    async fn analyze_voice(&self, posts: &[PublishedPost]) -> Result<VoiceAnalysis, GatewayError>;
}

/// Run a gateway call under `timeout`
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, GatewayError>
where
    F: std::future::Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(timeout)),
    }
}

/// Prompt asking for calibration sample posts
pub fn calibration_samples_prompt(count: usize) -> String {
    format!(
        "Write {count} short LinkedIn posts about professional growth, each in a clearly \
         different tone (for example: bold, warm, analytical, storytelling, formal, playful). \
         Reply with JSON only: {{\"variants\": [{{\"tone\": \"<tone label>\", \"content\": \"<post>\"}}]}}"
    )
}

/// Prompt asking for a five-dimension voice analysis
pub fn voice_analysis_prompt(posts: &[PublishedPost]) -> String {
    let mut prompt = String::from(
        "Analyse the writing voice of the following LinkedIn posts by one author. Score each \
         dimension from 0 to 10: formal, bold, empathetic, complexity, brevity. Name the \
         primary tone and give your confidence from 0 to 1. Reply with JSON only: \
         {\"formal\": n, \"bold\": n, \"empathetic\": n, \"complexity\": n, \"brevity\": n, \
         \"primary_tone\": \"<label>\", \"confidence\": n}\n",
    );
    for (i, post) in posts.iter().enumerate() {
        let excerpt: String = post.content.chars().take(POST_EXCERPT_CHARS).collect();
        prompt.push_str(&format!("\n--- Post {} ---\n{}\n", i + 1, excerpt));
    }
    prompt
}

/// Pull the first JSON value out of a model reply that may be wrapped in prose or fences
pub fn extract_json(text: &str) -> Result<serde_json::Value, GatewayError> {
    let start = text
        .find(|c: char| c == '{' || c == '[')
        .ok_or_else(|| GatewayError::Parse("reply contains no JSON".to_string()))?;

    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(GatewayError::Parse(e.to_string())),
        None => Err(GatewayError::Parse("reply contains no JSON".to_string())),
    }
}

/// Decode a variants reply: `{"variants": [...]}` or a bare array
pub fn parse_variants(text: &str) -> Result<Vec<GeneratedVariant>, GatewayError> {
    let value = extract_json(text)?;
    let list = match value {
        serde_json::Value::Object(mut map) => map
            .remove("variants")
            .ok_or_else(|| GatewayError::Parse("missing 'variants'".to_string()))?,
        other => other,
    };
    let variants: Vec<GeneratedVariant> =
        serde_json::from_value(list).map_err(|e| GatewayError::Parse(e.to_string()))?;
    Ok(variants
        .into_iter()
        .filter(|v| !v.content.trim().is_empty())
        .collect())
}

pub fn parse_voice_analysis(text: &str) -> Result<VoiceAnalysis, GatewayError> {
    let value = extract_json(text)?;
    serde_json::from_value(value).map_err(|e| GatewayError::Parse(e.to_string()))
}

/// Minimum-interval rate limiter
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("LLM Gateway rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API gateway
pub struct AnthropicGateway {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl AnthropicGateway {
    pub fn new(
        base_url: String,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            timeout,
        })
    }

    /// Send one prompt and return the concatenated text reply
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.rate_limiter.wait().await;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let started = Instant::now();
        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout)
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(status.as_u16(), error_text));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        tracing::debug!(
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "LLM Gateway call completed"
        );

        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(GatewayError::Parse("empty reply".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmGateway for AnthropicGateway {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate_variants(
        &self,
        prompt: &str,
        count: usize,
    ) -> Result<Vec<GeneratedVariant>, GatewayError> {
        let text = self.complete(prompt).await?;
        let mut variants = parse_variants(&text)?;
        variants.truncate(count);
        Ok(variants)
    }

    async fn analyze_voice(&self, posts: &[PublishedPost]) -> Result<VoiceAnalysis, GatewayError> {
        let text = self.complete(&voice_analysis_prompt(posts)).await?;
        parse_voice_analysis(&text)
    }
}

/// Gateway used when no API key is configured; every call fails
pub struct UnconfiguredGateway;

#[async_trait]
impl LlmGateway for UnconfiguredGateway {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn generate_variants(
        &self,
        _prompt: &str,
        _count: usize,
    ) -> Result<Vec<GeneratedVariant>, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn analyze_voice(&self, _posts: &[PublishedPost]) -> Result<VoiceAnalysis, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(500);
        assert_eq!(limiter.min_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_client_creation() {
        let gateway = AnthropicGateway::new(
            "https://example.invalid/".to_string(),
            "model".to_string(),
            "test_key".to_string(),
            Duration::from_secs(90),
        );
        assert_eq!(gateway.unwrap().base_url, "https://example.invalid");
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(100);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(190));
    }

    #[test]
    fn test_parse_variants_from_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"variants\": [\
            {\"tone\": \"bold\", \"content\": \"Ship it.\"},\
            {\"tone\": \"warm\", \"content\": \"Thank you, team.\"},\
            {\"tone\": \"flat\", \"content\": \"  \"}]}\n```";
        let variants = parse_variants(reply).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].tone_label, "bold");
        assert_eq!(variants[1].content, "Thank you, team.");
    }

    #[test]
    fn test_parse_variants_bare_array() {
        let reply = r#"[{"tone_label": "formal", "content": "Dear network,"}]"#;
        assert_eq!(parse_variants(reply).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(parse_variants("no idea"), Err(GatewayError::Parse(_))));
        assert!(matches!(
            parse_variants(r#"{"posts": []}"#),
            Err(GatewayError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_voice_analysis() {
        let reply = r#"{"formal": 6.5, "bold": 4, "empathetic": 7, "complexity": 3.5,
            "brevity": 8, "primary_tone": "warm", "confidence": 0.82}"#;
        let analysis = parse_voice_analysis(reply).unwrap();
        assert_eq!(analysis.dimensions.formal, 6.5);
        assert_eq!(analysis.dimensions.brevity, 8.0);
        assert_eq!(analysis.primary_tone, "warm");
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed_to_gateway_error() {
        let result: Result<(), GatewayError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_always_fails() {
        let gateway = UnconfiguredGateway;
        assert!(matches!(
            gateway.generate_variants("x", 3).await,
            Err(GatewayError::NotConfigured)
        ));
        assert!(matches!(
            gateway.analyze_voice(&[]).await,
            Err(GatewayError::NotConfigured)
        ));
    }

    #[test]
    fn test_voice_prompt_includes_each_post() {
        let posts: Vec<PublishedPost> = (0..2)
            .map(|i| PublishedPost {
                post_id: uuid::Uuid::new_v4(),
                user_id: uuid::Uuid::nil(),
                content: format!("content number {}", i),
                tone_label: None,
                predicted_hook_score: None,
                published_at: chrono::Utc::now(),
            })
            .collect();
        let prompt = voice_analysis_prompt(&posts);
        assert!(prompt.contains("--- Post 2 ---"));
        assert!(prompt.contains("content number 1"));
    }
}
