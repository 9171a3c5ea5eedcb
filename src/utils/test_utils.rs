use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::api::backend::{BackendRequest, ByteStream, ChatBackend};
use crate::api::ChatRequest;
use crate::core::app::{ChatEngine, EngineInit};
use crate::core::config::ModelConfig;
use crate::core::error::ChatError;
use crate::core::models::{ModelCatalog, StaticCredentials};
use crate::core::persistence::MemoryStore;

/// One `data:` line carrying `content` as a delta fragment.
pub fn delta_line(content: &str) -> String {
    let record = serde_json::json!({ "choices": [{ "delta": { "content": content } }] });
    format!("data: {record}\n")
}

/// A full event-stream body for `fragments`, terminated by `[DONE]`.
pub fn sse_body(fragments: &[&str]) -> String {
    let mut body: String = fragments.iter().map(|f| delta_line(f)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

/// `body` split into reads of at most `size` bytes.
pub fn chunked(
    body: &str,
    size: usize,
) -> impl Stream<Item = Result<Vec<u8>, ChatError>> + Unpin + Send {
    let chunks: Vec<Result<Vec<u8>, ChatError>> = body
        .as_bytes()
        .chunks(size.max(1))
        .map(|chunk| Ok(chunk.to_vec()))
        .collect();
    stream::iter(chunks)
}

/// What a [`ScriptedBackend`] does for one call.
pub enum Script {
    /// Streams `body` in reads of `chunk_size` bytes, then ends.
    Body { body: String, chunk_size: usize },
    /// Rejects the call before any body is produced.
    Reject(ChatError),
    /// Streams `body`, then fails the read with `error`.
    BreakAfter { body: String, error: ChatError },
    /// Streams `body`, then never yields again.
    Hang { body: String },
}

/// In-memory backend replaying one [`Script`] per call and recording the
/// requests it receives. An exhausted script list yields an empty body.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().expect("scripts lock").push_back(script);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn open_stream(
        &self,
        request: BackendRequest,
        cancel_token: CancellationToken,
    ) -> Result<ByteStream, ChatError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.body);
        if cancel_token.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let script = self.scripts.lock().expect("scripts lock").pop_front();
        match script {
            None => Ok(Box::pin(stream::empty())),
            Some(Script::Body { body, chunk_size }) => Ok(Box::pin(chunked(&body, chunk_size))),
            Some(Script::Reject(error)) => Err(error),
            Some(Script::BreakAfter { body, error }) => {
                Ok(Box::pin(chunked(&body, 16).chain(stream::iter(vec![Err(error)]))))
            }
            Some(Script::Hang { body }) => {
                Ok(Box::pin(chunked(&body, 16).chain(stream::pending())))
            }
        }
    }
}

pub fn test_credentials() -> StaticCredentials {
    StaticCredentials::new()
        .with("COLLOQUY_KEY_GPT_3_5", "sk-test-35")
        .with("COLLOQUY_KEY_GPT_4", "sk-test-4")
        .with("COLLOQUY_KEY_DEEPSEEK", "sk-test-ds")
}

/// Engine over an in-memory store and a scripted backend, with every
/// built-in model credentialed and one empty session selected.
pub fn create_test_engine(
    scripts: Vec<Script>,
) -> (ChatEngine, Arc<ScriptedBackend>, Arc<MemoryStore>) {
    let backend = Arc::new(ScriptedBackend::new(scripts));
    let store = Arc::new(MemoryStore::new());
    let mut engine = ChatEngine::new(EngineInit {
        store: Box::new(Arc::clone(&store)),
        backend: backend.clone(),
        credentials: Box::new(test_credentials()),
        catalog: ModelCatalog::builtin(),
        model_config: ModelConfig::default(),
        default_model: Some("gpt-4".to_string()),
    });
    engine.create_session();
    (engine, backend, store)
}

/// Engine restored from whatever `store` holds.
pub fn reload_engine(store: &Arc<MemoryStore>, backend: &Arc<ScriptedBackend>) -> ChatEngine {
    ChatEngine::new(EngineInit {
        store: Box::new(Arc::clone(store)),
        backend: backend.clone(),
        credentials: Box::new(test_credentials()),
        catalog: ModelCatalog::builtin(),
        model_config: ModelConfig::default(),
        default_model: None,
    })
}
