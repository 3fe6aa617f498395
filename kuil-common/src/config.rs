//! Bootstrap configuration loading
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: database path, port, logging, LLM endpoint (read once at startup)
//! 2. **Database runtime**: tunables in the `settings` table (see `db::init`)
//!
//! A missing TOML file is not an error: the service logs a warning and starts
//! with compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port for kuil-voice
pub const DEFAULT_PORT: u16 = 5780;

/// Default LLM Gateway base URL
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.anthropic.com";

/// Default model requested from the LLM Gateway
pub const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-5";

/// Ceiling for a single LLM Gateway call (long-form generation observed up to 90 s)
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 90;

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (defaults to `<data dir>/kuil/kuil.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// LLM Gateway connection
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// LLM Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API key; the `KUIL_LLM_API_KEY` environment variable takes priority
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_llm_timeout_secs() -> u64 {
    DEFAULT_LLM_TIMEOUT_SECS
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl TomlConfig {
    /// Database path from TOML, or the platform data directory default
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("kuil.db"))
    }
}

/// Default configuration file location: `<config dir>/kuil/<service>.toml`
pub fn default_config_path(service_name: &str) -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("kuil").join(format!("{}.toml", service_name)))
        .unwrap_or_else(|| PathBuf::from(format!("{}.toml", service_name)))
}

/// OS-dependent data directory for the database
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kuil"))
        .unwrap_or_else(|| PathBuf::from("./kuil_data"))
}

/// Load TOML bootstrap configuration
///
/// Missing file → warning + defaults. A file that exists but fails to parse
/// is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found at {}, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML configuration, creating the parent directory if needed
///
/// Writes to a temporary sibling file and renames it into place.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Resolve the LLM API key
///
/// **Priority:** ENV (`KUIL_LLM_API_KEY`) → TOML
pub fn resolve_llm_api_key(config: &TomlConfig) -> Option<String> {
    let env_key = std::env::var("KUIL_LLM_API_KEY")
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = config.llm.api_key.clone().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("LLM API key found in environment and TOML. Using environment (highest priority).");
    }

    if env_key.is_some() {
        info!("LLM API key loaded from environment variable");
        return env_key;
    }
    if toml_key.is_some() {
        info!("LLM API key loaded from TOML config");
        return toml_key;
    }

    warn!("LLM API key not configured; calibration samples will use the built-in set");
    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
