use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::core::models::ModelSpec;
use crate::utils::url::is_http_url;

/// Sampling parameters sent with every request. Replaced as a whole, never
/// field by field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Model selected on first start, before any state has been saved
    pub default_model: Option<String>,
    /// Sampling parameters for every generation
    #[serde(default)]
    pub model_config: ModelConfig,
    /// Additional OpenAI-compatible models; an entry whose id matches a
    /// built-in model replaces it
    #[serde(default)]
    pub custom_models: Vec<ModelSpec>,
    /// Where session state is stored (defaults to the platform data dir)
    pub state_path: Option<PathBuf>,
    /// Log level for the `colloquy` target when RUST_LOG is unset
    pub log_level: Option<String>,
}

impl Config {
    /// Custom models with a usable base URL. Invalid entries are logged and
    /// skipped rather than failing the whole config.
    pub fn valid_custom_models(&self) -> Vec<ModelSpec> {
        self.custom_models
            .iter()
            .filter(|model| {
                let valid = is_http_url(&model.base_url);
                if !valid {
                    warn!(
                        model = %model.id,
                        base_url = %model.base_url,
                        "ignoring custom model without an http(s) base_url"
                    );
                }
                valid
            })
            .cloned()
            .collect()
    }
}

/// Get a user-friendly display string for a path, using `~` for the home
/// directory on Unix-like systems.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            if let Ok(relative) = path.strip_prefix(PathBuf::from(home)) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
