use std::error::Error;
use std::fmt;

/// Failures surfaced by the session registry and the generation controller.
///
/// Registry guards (`NoActiveSession`, `EmptyMessage`, ...) are returned to the
/// caller directly. Everything that goes wrong during a generation is folded
/// into a terminal message state instead, so none of these is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The operation needs a current session and none is selected.
    NoActiveSession,

    /// User messages must contain non-whitespace text.
    EmptyMessage,

    /// No session is registered under the given id.
    UnknownSession(String),

    /// The session has no assistant message to patch.
    NoAssistantMessage,

    /// The addressed message does not exist in the session.
    UnknownMessage(String),

    /// The model id is not present in the model catalog.
    UnsupportedModel(String),

    /// The credential for a model could not be found.
    MissingCredential {
        /// Model that needed the credential.
        model: String,
        /// Environment variable the credential is read from.
        env_key: String,
    },

    /// Network or backend failure.
    Transport(String),

    /// The generation was aborted by the user.
    Cancelled,
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport(message.into())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }

    /// Text stored on a failed assistant message.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Cancelled => "Generation aborted".to_string(),
            ChatError::UnsupportedModel(model) => format!("Model '{model}' is not supported"),
            ChatError::MissingCredential { env_key, .. } => {
                format!("Set {env_key} to use this model")
            }
            ChatError::Transport(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::NoActiveSession => write!(f, "no active session"),
            ChatError::EmptyMessage => write!(f, "message content is empty"),
            ChatError::UnknownSession(id) => write!(f, "unknown session: {id}"),
            ChatError::NoAssistantMessage => write!(f, "session has no assistant message"),
            ChatError::UnknownMessage(id) => write!(f, "unknown message: {id}"),
            ChatError::UnsupportedModel(model) => write!(f, "unsupported model: {model}"),
            ChatError::MissingCredential { model, env_key } => {
                write!(f, "missing credential for {model} (expected in {env_key})")
            }
            ChatError::Transport(message) => write!(f, "transport error: {message}"),
            ChatError::Cancelled => write!(f, "generation cancelled"),
        }
    }
}

impl Error for ChatError {}
