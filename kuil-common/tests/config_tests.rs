//! Bootstrap configuration tests
//!
//! Tests that touch KUIL_LLM_API_KEY are marked #[serial] so they do not race
//! on the process environment.

use kuil_common::config::{
    is_valid_key, load_toml_config, resolve_llm_api_key, write_toml_config, LlmConfig,
    TomlConfig, DEFAULT_LLM_BASE_URL, DEFAULT_PORT,
};
use kuil_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.llm.base_url, DEFAULT_LLM_BASE_URL);
    assert!(config.database_path.is_none());
    assert!(config.llm.api_key.is_none());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kuil-voice.toml");
    std::fs::write(
        &path,
        r#"
port = 6001

[llm]
model = "custom-model"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.port, 6001);
    assert_eq!(config.llm.model, "custom-model");
    assert_eq!(config.llm.base_url, DEFAULT_LLM_BASE_URL);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "port = \"not a number").unwrap();

    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[test]
fn test_write_then_load_preserves_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("kuil-voice.toml");

    let config = TomlConfig {
        database_path: Some(PathBuf::from("/var/lib/kuil/kuil.db")),
        port: 7000,
        llm: LlmConfig {
            api_key: Some("secret".to_string()),
            ..LlmConfig::default()
        },
        ..TomlConfig::default()
    };
    write_toml_config(&config, &path).unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded.port, 7000);
    assert_eq!(loaded.database_path, Some(PathBuf::from("/var/lib/kuil/kuil.db")));
    assert_eq!(loaded.llm.api_key.as_deref(), Some("secret"));
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
fn test_resolved_database_path_prefers_toml() {
    let config = TomlConfig {
        database_path: Some(PathBuf::from("/tmp/explicit.db")),
        ..TomlConfig::default()
    };
    assert_eq!(config.resolved_database_path(), PathBuf::from("/tmp/explicit.db"));

    let default_path = TomlConfig::default().resolved_database_path();
    assert!(default_path.ends_with("kuil.db"));
}

#[test]
fn test_is_valid_key() {
    assert!(is_valid_key("abc"));
    assert!(!is_valid_key(""));
    assert!(!is_valid_key("   \t"));
}

#[test]
#[serial]
fn test_api_key_env_overrides_toml() {
    env::set_var("KUIL_LLM_API_KEY", "from-env");
    let config = TomlConfig {
        llm: LlmConfig {
            api_key: Some("from-toml".to_string()),
            ..LlmConfig::default()
        },
        ..TomlConfig::default()
    };

    assert_eq!(resolve_llm_api_key(&config).as_deref(), Some("from-env"));
    env::remove_var("KUIL_LLM_API_KEY");
}

#[test]
#[serial]
fn test_api_key_falls_back_to_toml_then_none() {
    env::remove_var("KUIL_LLM_API_KEY");
    let mut config = TomlConfig::default();
    assert!(resolve_llm_api_key(&config).is_none());

    config.llm.api_key = Some("from-toml".to_string());
    assert_eq!(resolve_llm_api_key(&config).as_deref(), Some("from-toml"));

    env::set_var("KUIL_LLM_API_KEY", "   ");
    assert_eq!(resolve_llm_api_key(&config).as_deref(), Some("from-toml"));
    env::remove_var("KUIL_LLM_API_KEY");
}
