//! The chat engine: the single owner of conversation state.
//!
//! Front ends hold a [`ChatEngine`], call its operations, and read the
//! registry back for rendering. Generations run in background tasks (see
//! [`crate::core::chat_stream::ChatStreamService`]) and report back through
//! [`ChatEngine::apply_stream_message`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::backend::{ChatBackend, HttpBackend};
use crate::core::config::{Config, ModelConfig};
use crate::core::constants::DEFAULT_MODEL;
use crate::core::error::ChatError;
use crate::core::message::Message;
use crate::core::models::{CredentialSource, EnvCredentials, ModelCatalog};
use crate::core::persistence::{Snapshot, SnapshotStore};
use crate::core::registry::{Registry, Session, SessionId};

pub mod generation;

pub use generation::{ActiveGeneration, GenerationOutcome, GenerationPhase};

/// Collaborators and settings for a new engine.
pub struct EngineInit {
    pub store: Box<dyn SnapshotStore>,
    pub backend: Arc<dyn ChatBackend>,
    pub credentials: Box<dyn CredentialSource>,
    pub catalog: ModelCatalog,
    pub model_config: ModelConfig,
    /// Model used when the store holds no snapshot yet.
    pub default_model: Option<String>,
}

pub struct ChatEngine {
    pub(crate) registry: Registry,
    store: Box<dyn SnapshotStore>,
    pub(crate) catalog: ModelCatalog,
    pub(crate) credentials: Box<dyn CredentialSource>,
    pub(crate) backend: Arc<dyn ChatBackend>,
    pub(crate) model_config: ModelConfig,
    pub(crate) active: Option<ActiveGeneration>,
    pub(crate) last_stream_id: u64,
    saving: bool,
}

impl ChatEngine {
    /// Builds an engine from the persisted snapshot, or from scratch when the
    /// store is empty or unreadable.
    pub fn new(init: EngineInit) -> Self {
        let EngineInit {
            store,
            backend,
            credentials,
            catalog,
            model_config,
            default_model,
        } = init;

        let mut saving = true;
        let mut registry = match store.load() {
            Ok(Some(snapshot)) => snapshot.into_registry(),
            Ok(None) => Registry::new(Self::initial_model(&catalog, default_model)),
            Err(e) => {
                warn!(error = %e, "failed to load chat state; starting empty");
                saving = Self::set_aside_unreadable(store.as_ref());
                Registry::new(Self::initial_model(&catalog, default_model))
            }
        };

        let settled = registry.settle_interrupted();
        if settled > 0 {
            info!(settled, "marked interrupted generations as failed");
        }

        let engine = Self {
            registry,
            store,
            catalog,
            credentials,
            backend,
            model_config,
            active: None,
            last_stream_id: 0,
            saving,
        };
        if settled > 0 {
            engine.persist();
        }
        engine
    }

    /// Engine wired to the HTTP backend and environment credentials, with
    /// models and sampling parameters taken from `config`.
    pub fn from_config(config: &Config, store: Box<dyn SnapshotStore>) -> Result<Self, ChatError> {
        Ok(Self::new(EngineInit {
            store,
            backend: Arc::new(HttpBackend::new()?),
            credentials: Box::new(EnvCredentials),
            catalog: ModelCatalog::with_custom(&config.valid_custom_models()),
            model_config: config.model_config,
            default_model: config.default_model.clone(),
        }))
    }

    fn initial_model(catalog: &ModelCatalog, default_model: Option<String>) -> String {
        default_model
            .or_else(|| catalog.first_id().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Keeps an unreadable record from being overwritten. Returns whether
    /// saving may continue.
    fn set_aside_unreadable(store: &dyn SnapshotStore) -> bool {
        match store.set_aside() {
            Ok(Some(path)) => {
                warn!(path = %path.display(), "moved unreadable chat state aside");
                true
            }
            Ok(None) => {
                warn!("unreadable chat state cannot be moved aside; saving disabled");
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to move unreadable chat state aside; saving disabled");
                false
            }
        }
    }

    /// False when the stored state could not be read or preserved, in which
    /// case nothing is written for the rest of the run.
    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub(crate) fn persist(&self) {
        if !self.saving {
            return;
        }
        if let Err(e) = self.store.save(&Snapshot::capture(&self.registry)) {
            warn!(error = %e, "failed to persist chat state");
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn sessions(&self) -> &BTreeMap<SessionId, Session> {
        self.registry.sessions()
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.registry.current_session_id()
    }

    pub fn current_model(&self) -> &str {
        self.registry.current_model()
    }

    /// Messages to render for the current session.
    pub fn current_messages(&self) -> &[Message] {
        self.registry.current_messages()
    }

    /// Display label for a model id, or the id itself when unknown.
    pub fn model_label<'a>(&'a self, model_id: &'a str) -> &'a str {
        self.catalog.label(model_id)
    }

    pub fn model_config(&self) -> ModelConfig {
        self.model_config
    }

    pub fn update_model_config(&mut self, model_config: ModelConfig) {
        debug!(?model_config, "model config replaced");
        self.model_config = model_config;
    }

    pub fn create_session(&mut self) -> SessionId {
        let session_id = self.registry.create_session();
        debug!(session = %session_id, model = %self.registry.current_model(), "session created");
        self.persist();
        session_id
    }

    /// Creates a session when none is current, as the front end does on
    /// first start.
    pub fn ensure_session(&mut self) -> SessionId {
        let created = self.registry.current_session_id().is_none();
        let session_id = self.registry.ensure_session();
        if created {
            debug!(session = %session_id, model = %self.registry.current_model(), "session created");
            self.persist();
        }
        session_id
    }

    pub fn select_session(&mut self, session_id: &str) -> Result<(), ChatError> {
        self.registry.select_session(session_id)?;
        self.persist();
        Ok(())
    }

    pub fn switch_model(&mut self, model_id: &str) -> Result<(), ChatError> {
        self.registry.switch_model(model_id)?;
        debug!(model = %model_id, "model switched");
        self.persist();
        Ok(())
    }

    /// Appends a user message to the current session and returns its id.
    pub fn add_user_message(&mut self, content: &str) -> Result<String, ChatError> {
        let message_id = self.registry.add_user_message(content)?.id.clone();
        self.persist();
        Ok(message_id)
    }
}
