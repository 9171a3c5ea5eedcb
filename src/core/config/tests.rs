use super::data::{path_display, Config, ModelConfig};
use super::io::ConfigError;
use crate::core::models::{ModelCatalog, ModelSpec};
use std::fs;
use tempfile::TempDir;

fn local_model(base_url: &str) -> ModelSpec {
    ModelSpec {
        id: "local".to_string(),
        label: "Local".to_string(),
        base_url: base_url.to_string(),
        backend_model: "llama3".to_string(),
        credential_env: "LOCAL_KEY".to_string(),
    }
}

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert_eq!(config.model_config, ModelConfig::default());
}

#[test]
fn custom_models_load_from_toml() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"default_model = "local"
state_path = "/var/lib/colloquy/state.json"
log_level = "debug"

[model_config]
temperature = 0.2
max_tokens = 4096

[[custom_models]]
id = "local"
label = "Local"
base_url = "http://localhost:11434/v1"
backend_model = "llama3"
credential_env = "LOCAL_KEY"
"#,
    )
    .expect("write");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(config.default_model.as_deref(), Some("local"));
    assert_eq!(config.model_config.max_tokens, 4096);
    assert_eq!(config.model_config.top_p, 1.0);
    assert_eq!(config.custom_models, vec![local_model("http://localhost:11434/v1")]);
    assert_eq!(config.log_level.as_deref(), Some("debug"));
    assert_eq!(
        config.state_path.as_deref(),
        Some(std::path::Path::new("/var/lib/colloquy/state.json"))
    );
}

#[test]
fn partial_model_config_fills_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        "default_model = \"gpt-4\"\n\n[model_config]\ntemperature = 0.1\n",
    )
    .expect("write");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(config.default_model.as_deref(), Some("gpt-4"));
    assert_eq!(config.model_config.temperature, 0.1);
    assert_eq!(config.model_config.max_tokens, 1000);
}

#[test]
fn invalid_toml_reports_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "default_model = [").expect("write");

    let err = Config::load_from_path(&config_path).expect_err("parse error");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().starts_with("Failed to parse config at"));
}

#[test]
fn custom_models_without_http_urls_are_skipped() {
    let mut config = Config {
        custom_models: vec![local_model("localhost:11434")],
        ..Config::default()
    };
    assert!(config.valid_custom_models().is_empty());

    config.custom_models.push(local_model("http://localhost:11434/v1"));
    assert_eq!(config.valid_custom_models().len(), 1);
    let catalog = ModelCatalog::with_custom(&config.valid_custom_models());
    assert_eq!(catalog.label("local"), "Local");
}

#[test]
fn path_display_keeps_paths_outside_home() {
    assert_eq!(path_display("/definitely/not/home"), "/definitely/not/home");
}
