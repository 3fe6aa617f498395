//! Database access for kuil-voice
//!
//! Every query is scoped by `user_id`; multi-row updates run in a transaction.

pub mod calibration;
pub mod hook_calibration;
pub mod posts;
pub mod settings;
pub mod users;
pub mod voice;

use kuil_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool with the full schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    kuil_common::db::init_database(db_path).await
}
