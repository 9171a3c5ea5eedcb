use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// The user input preserved on a failed or cancelled message so it can be
/// resubmitted without retyping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPayload {
    pub user_input: String,
}

impl RetryPayload {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_requesting: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub was_cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_payload: Option<RetryPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, model: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            model,
            created_at: Utc::now(),
            is_streaming: false,
            is_requesting: false,
            failed: false,
            was_cancelled: false,
            retry_payload: None,
            error: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, None)
    }

    /// An empty assistant message waiting for its first response signal.
    pub fn assistant_placeholder(model: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Assistant, String::new(), Some(model.into()));
        message.is_requesting = true;
        message
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    /// True while a generation still owns this message.
    pub fn is_in_flight(&self) -> bool {
        self.is_requesting || self.is_streaming
    }

    /// Applies `patch` field by field: content appends (or resets), every
    /// other present field overwrites, absent fields are left untouched.
    pub fn apply(&mut self, patch: MessagePatch) {
        match patch.content {
            ContentPatch::Keep => {}
            ContentPatch::Append(fragment) => self.content.push_str(&fragment),
            ContentPatch::Reset => self.content.clear(),
        }
        if self.is_user() {
            return;
        }
        if let Some(model) = patch.model {
            self.model = Some(model);
        }
        if let Some(value) = patch.is_requesting {
            self.is_requesting = value;
        }
        if let Some(value) = patch.is_streaming {
            self.is_streaming = value;
        }
        if let Some(value) = patch.failed {
            self.failed = value;
        }
        if let Some(value) = patch.was_cancelled {
            self.was_cancelled = value;
        }
        if let Some(value) = patch.retry_payload {
            self.retry_payload = value;
        }
        if let Some(value) = patch.error {
            self.error = value;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ContentPatch {
    #[default]
    Keep,
    Append(String),
    Reset,
}

/// Field-level update for a single message. See [`Message::apply`] for the
/// merge policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: ContentPatch,
    pub model: Option<String>,
    pub is_requesting: Option<bool>,
    pub is_streaming: Option<bool>,
    pub failed: Option<bool>,
    pub was_cancelled: Option<bool>,
    pub retry_payload: Option<Option<RetryPayload>>,
    pub error: Option<Option<String>>,
}

impl MessagePatch {
    pub fn append(fragment: impl Into<String>) -> Self {
        Self {
            content: ContentPatch::Append(fragment.into()),
            ..Self::default()
        }
    }

    /// Requesting -> Streaming.
    pub fn streaming() -> Self {
        Self {
            is_requesting: Some(false),
            is_streaming: Some(true),
            ..Self::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            is_requesting: Some(false),
            is_streaming: Some(false),
            ..Self::default()
        }
    }

    /// Empties a previous attempt and puts the message back into Requesting.
    pub fn reset_for_retry(model: impl Into<String>) -> Self {
        Self {
            content: ContentPatch::Reset,
            model: Some(model.into()),
            is_requesting: Some(true),
            is_streaming: Some(false),
            failed: Some(false),
            was_cancelled: Some(false),
            retry_payload: Some(None),
            error: Some(None),
        }
    }

    pub fn failed(
        was_cancelled: bool,
        retry_payload: Option<RetryPayload>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            content: ContentPatch::Keep,
            model: None,
            is_requesting: Some(false),
            is_streaming: Some(false),
            failed: Some(true),
            was_cancelled: Some(was_cancelled),
            retry_payload: Some(retry_payload),
            error: Some(Some(error.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(Role::try_from("system").is_err());
        assert_eq!(Role::try_from("assistant"), Ok(Role::Assistant));
    }

    #[test]
    fn content_appends_and_flags_overwrite() {
        let mut message = Message::assistant_placeholder("gpt-4");
        message.apply(MessagePatch::streaming());
        message.apply(MessagePatch::append("Hel"));
        message.apply(MessagePatch::append("lo"));

        assert_eq!(message.content, "Hello");
        assert!(message.is_streaming);
        assert!(!message.is_requesting);

        message.apply(MessagePatch::completed());
        assert!(!message.is_in_flight());
        assert_eq!(message.content, "Hello");
    }

    #[test]
    fn retry_reset_clears_failure_but_keeps_id() {
        let mut message = Message::assistant_placeholder("gpt-4");
        let id = message.id.clone();
        message.apply(MessagePatch::append("partial"));
        message.apply(MessagePatch::failed(
            true,
            Some(RetryPayload::new("hi")),
            "Generation aborted",
        ));
        assert!(message.failed && message.was_cancelled);

        message.apply(MessagePatch::reset_for_retry("deepseek"));
        assert_eq!(message.id, id);
        assert!(message.content.is_empty());
        assert!(message.is_requesting);
        assert!(!message.failed && !message.was_cancelled);
        assert_eq!(message.retry_payload, None);
        assert_eq!(message.error, None);
        assert_eq!(message.model.as_deref(), Some("deepseek"));
    }

    #[test]
    fn user_messages_never_take_generation_flags() {
        let mut message = Message::user("hi");
        message.apply(MessagePatch::streaming());
        assert!(!message.is_in_flight());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let mut message = Message::assistant_placeholder("gpt-4");
        message.apply(MessagePatch::failed(
            false,
            Some(RetryPayload::new("hi")),
            "boom",
        ));
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["isRequesting"], false);
        assert_eq!(value["wasCancelled"], false);
        assert_eq!(value["retryPayload"]["userInput"], "hi");
        assert!(value.get("createdAt").is_some());
    }
}
