use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::ChatError;
use crate::core::message::{Message, MessagePatch, RetryPayload};

pub type SessionId = String;

/// One independent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub messages: Vec<Message>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
            created_at: Utc::now(),
        }
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_user())
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }

    fn last_assistant_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.is_assistant())
    }

    pub fn message_index(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }
}

/// Process-wide conversation state: every session, the current selection and
/// the model new sessions inherit.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    sessions: BTreeMap<SessionId, Session>,
    current_session_id: Option<SessionId>,
    current_model: String,
    last_session_stamp: i64,
}

impl Registry {
    pub fn new(current_model: impl Into<String>) -> Self {
        Self {
            sessions: BTreeMap::new(),
            current_session_id: None,
            current_model: current_model.into(),
            last_session_stamp: 0,
        }
    }

    pub fn from_parts(
        sessions: BTreeMap<SessionId, Session>,
        current_session_id: Option<SessionId>,
        current_model: String,
    ) -> Self {
        let last_session_stamp = sessions
            .keys()
            .filter_map(|id| id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        let current_session_id = current_session_id.filter(|id| sessions.contains_key(id));
        Self {
            sessions,
            current_session_id,
            current_model,
            last_session_stamp,
        }
    }

    pub fn sessions(&self) -> &BTreeMap<SessionId, Session> {
        &self.sessions
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session_id
            .as_deref()
            .and_then(|id| self.sessions.get(id))
    }

    pub fn current_model(&self) -> &str {
        &self.current_model
    }

    /// Messages of the current session, empty when nothing is selected.
    pub fn current_messages(&self) -> &[Message] {
        self.current_session()
            .map(|session| session.messages.as_slice())
            .unwrap_or(&[])
    }

    fn next_session_id(&mut self) -> SessionId {
        let stamp = Utc::now().timestamp_millis().max(self.last_session_stamp + 1);
        self.last_session_stamp = stamp;
        stamp.to_string()
    }

    pub fn create_session(&mut self) -> SessionId {
        let session_id = self.next_session_id();
        self.sessions
            .insert(session_id.clone(), Session::new(self.current_model.clone()));
        self.current_session_id = Some(session_id.clone());
        session_id
    }

    /// Creates a session unless one is already current.
    pub fn ensure_session(&mut self) -> SessionId {
        match &self.current_session_id {
            Some(id) => id.clone(),
            None => self.create_session(),
        }
    }

    pub fn select_session(&mut self, session_id: &str) -> Result<(), ChatError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| ChatError::UnknownSession(session_id.to_string()))?;
        self.current_model = session.model.clone();
        self.current_session_id = Some(session_id.to_string());
        Ok(())
    }

    pub fn switch_model(&mut self, model_id: &str) -> Result<(), ChatError> {
        let session_id = self
            .current_session_id
            .clone()
            .ok_or(ChatError::NoActiveSession)?;
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ChatError::NoActiveSession)?;
        session.model = model_id.to_string();
        self.current_model = model_id.to_string();
        Ok(())
    }

    pub fn add_user_message(&mut self, content: &str) -> Result<&Message, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let session = self.current_session_mut()?;
        session.messages.push(Message::user(content));
        let index = session.messages.len() - 1;
        Ok(&session.messages[index])
    }

    pub fn push_message(&mut self, session_id: &str, message: Message) -> Result<(), ChatError> {
        self.session_mut(session_id)?.messages.push(message);
        Ok(())
    }

    /// Patches the most recent assistant message in place, keeping its id.
    pub fn replace_last_assistant_message(
        &mut self,
        session_id: &str,
        patch: MessagePatch,
    ) -> Result<&Message, ChatError> {
        let session = self.session_mut(session_id)?;
        let index = session
            .last_assistant_index()
            .ok_or(ChatError::NoAssistantMessage)?;
        let message = &mut session.messages[index];
        message.apply(patch);
        Ok(&*message)
    }

    pub fn patch_message(
        &mut self,
        session_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> Result<&Message, ChatError> {
        let session = self.session_mut(session_id)?;
        let index = session
            .message_index(message_id)
            .ok_or_else(|| ChatError::UnknownMessage(message_id.to_string()))?;
        let message = &mut session.messages[index];
        message.apply(patch);
        Ok(&*message)
    }

    pub fn last_user_input(&self, session_id: &str) -> Option<RetryPayload> {
        self.sessions
            .get(session_id)
            .and_then(Session::last_user_message)
            .map(|message| RetryPayload::new(message.content.clone()))
    }

    /// Marks messages left requesting or streaming by an earlier process as
    /// failed. Returns how many were settled.
    pub fn settle_interrupted(&mut self) -> usize {
        let mut settled = 0;
        for session in self.sessions.values_mut() {
            let retry_payload = session
                .last_user_message()
                .map(|message| RetryPayload::new(message.content.clone()));
            for message in session.messages.iter_mut().filter(|m| m.is_in_flight()) {
                message.apply(MessagePatch::failed(
                    false,
                    retry_payload.clone(),
                    "Generation was interrupted",
                ));
                settled += 1;
            }
        }
        settled
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut Session, ChatError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| ChatError::UnknownSession(session_id.to_string()))
    }

    fn current_session_mut(&mut self) -> Result<&mut Session, ChatError> {
        let session_id = self
            .current_session_id
            .clone()
            .ok_or(ChatError::NoActiveSession)?;
        self.session_mut(&session_id)
    }
}
