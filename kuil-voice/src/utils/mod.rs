//! Utility modules for kuil-voice

pub mod db_retry;
pub mod timestamps;

pub use db_retry::retry_on_lock;
