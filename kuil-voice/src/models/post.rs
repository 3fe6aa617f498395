//! Published posts
//!
//! Source material for voice analysis and the link between a post's predicted
//! hook score and its later engagement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedPost {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub tone_label: Option<String>,
    /// Hook score predicted at generation time
    pub predicted_hook_score: Option<u8>,
    pub published_at: DateTime<Utc>,
}
