//! Model catalog
//!
//! Built-in models are loaded from `builtin_models.toml`, embedded at build
//! time. The config file may add more, or override a built-in by reusing its
//! id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::constants::CHAT_COMPLETIONS_ENDPOINT;
use crate::core::error::ChatError;
use crate::utils::url::construct_api_url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub label: String,
    pub base_url: String,
    pub backend_model: String,
    pub credential_env: String,
}

impl ModelSpec {
    pub fn endpoint(&self) -> String {
        construct_api_url(&self.base_url, CHAT_COMPLETIONS_ENDPOINT)
    }
}

#[derive(Debug, Deserialize)]
struct BuiltinModelsConfig {
    models: Vec<ModelSpec>,
}

/// Load built-in models from the embedded configuration
pub fn load_builtin_models() -> Vec<ModelSpec> {
    const CONFIG_CONTENT: &str = include_str!("builtin_models.toml");

    let config: BuiltinModelsConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtin_models.toml");

    config.models
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    pub fn builtin() -> Self {
        Self::new(load_builtin_models())
    }

    /// Built-ins plus `custom`, where a custom entry replaces the built-in
    /// with the same id (case-insensitive).
    pub fn with_custom(custom: &[ModelSpec]) -> Self {
        let mut catalog = Self::builtin();
        for spec in custom {
            match catalog
                .models
                .iter_mut()
                .find(|m| m.id.eq_ignore_ascii_case(&spec.id))
            {
                Some(existing) => *existing = spec.clone(),
                None => catalog.models.push(spec.clone()),
            }
        }
        catalog
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn find(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id.eq_ignore_ascii_case(id))
    }

    pub fn lookup(&self, id: &str) -> Result<&ModelSpec, ChatError> {
        self.find(id)
            .ok_or_else(|| ChatError::UnsupportedModel(id.to_string()))
    }

    /// Display label for `id`, falling back to the raw id.
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.find(id).map(|m| m.label.as_str()).unwrap_or(id)
    }

    pub fn first_id(&self) -> Option<&str> {
        self.models.first().map(|m| m.id.as_str())
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Where model credentials come from.
pub trait CredentialSource: Send + Sync {
    fn credential(&self, spec: &ModelSpec) -> Option<String>;
}

/// Reads the environment variable named by the model's `credential_env`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn credential(&self, spec: &ModelSpec) -> Option<String> {
        std::env::var(&spec.credential_env).ok()
    }
}

/// Fixed credentials keyed by environment variable name.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    keys: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, env_key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(env_key.into(), value.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn credential(&self, spec: &ModelSpec) -> Option<String> {
        self.keys.get(&spec.credential_env).cloned()
    }
}

pub fn resolve_credential(
    source: &dyn CredentialSource,
    spec: &ModelSpec,
) -> Result<String, ChatError> {
    source
        .credential(spec)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ChatError::MissingCredential {
            model: spec.id.clone(),
            env_key: spec.credential_env.clone(),
        })
}
