//! # Kuil Common Library
//!
//! Shared code for the Kuil backend services:
//! - Database initialization and schema
//! - Event types (KuilEvent enum) and the EventBus
//! - Bootstrap configuration loading
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
