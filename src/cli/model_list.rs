//! Model listing functionality
//!
//! Shows every model in the catalog and whether its credential is set.

use crate::core::app::ChatEngine;
use crate::core::models::{resolve_credential, CredentialSource, EnvCredentials, ModelSpec};

pub fn list_models(engine: &ChatEngine) {
    println!("🤖 Available Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    let current = engine.current_model();
    for model in engine.catalog().models() {
        println!("{}", model_line(model, current, &EnvCredentials));
    }
}

pub(crate) fn model_line(model: &ModelSpec, current: &str, credentials: &dyn CredentialSource) -> String {
    let marker = if model.id == current { "▶" } else { " " };
    let credential = match resolve_credential(credentials, model) {
        Ok(_) => "✅".to_string(),
        Err(_) => format!("❌ set {}", model.credential_env),
    };
    format!(
        "{marker} {:<12} {:<12} {} {credential}",
        model.id,
        model.label,
        model.endpoint()
    )
}
