/// Name of the persisted state record.
pub const STORAGE_RECORD_NAME: &str = "chat-app-storage";

/// Model selected when neither the snapshot nor the config names one.
pub const DEFAULT_MODEL: &str = "gpt-3.5";

pub const CHAT_COMPLETIONS_ENDPOINT: &str = "chat/completions";
