use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ChatEngine;
use crate::api::backend::BackendRequest;
use crate::api::{ChatMessage, ChatRequest};
use crate::core::chat_stream::{StreamMessage, StreamParams};
use crate::core::error::ChatError;
use crate::core::message::{Message, MessagePatch, RetryPayload};
use crate::core::models::resolve_credential;

/// Where the in-flight generation currently is. `Idle` when nothing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    Requesting,
    Streaming,
}

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ActiveGeneration {
    pub stream_id: u64,
    pub session_id: String,
    pub message_id: String,
    pub cancel_token: CancellationToken,
    pub phase: GenerationPhase,
}

impl ChatEngine {
    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }

    pub fn generation_phase(&self) -> GenerationPhase {
        self.active
            .as_ref()
            .map_or(GenerationPhase::Idle, |active| active.phase)
    }

    pub fn active_generation(&self) -> Option<&ActiveGeneration> {
        self.active.as_ref()
    }

    /// Token of the in-flight generation. Cancelling it from elsewhere (a
    /// signal handler, say) ends the generation as Cancelled once the
    /// producer reports back.
    pub fn abort_handle(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|active| active.cancel_token.clone())
    }

    /// Starts answering the last user message of the current session.
    ///
    /// With `retry`, the most recent assistant message is reused in place
    /// instead of appending a new one. Returns the parameters for
    /// [`crate::core::chat_stream::ChatStreamService::spawn_stream`], or
    /// `None` when nothing was started: another generation is in flight,
    /// there is no current session or nothing to answer, or the model could
    /// not be resolved (the target message is then already failed).
    pub fn start_generation(&mut self, retry: Option<RetryPayload>) -> Option<StreamParams> {
        if let Some(active) = &self.active {
            debug!(
                stream_id = active.stream_id,
                "generation already in flight; ignoring start"
            );
            return None;
        }
        let Some(session) = self.registry.current_session() else {
            debug!("no current session; ignoring start");
            return None;
        };
        if session.last_user_message().is_none() {
            debug!("nothing to answer; ignoring start");
            return None;
        }
        let session_id = self.registry.current_session_id()?.to_string();
        let model_id = self.registry.current_model().to_string();

        let message_id = self.prepare_target(&session_id, &model_id, retry.is_some())?;

        let resolved = self.catalog.lookup(&model_id).cloned().and_then(|spec| {
            resolve_credential(self.credentials.as_ref(), &spec).map(|api_key| (spec, api_key))
        });
        let (spec, api_key) = match resolved {
            Ok(resolved) => resolved,
            Err(error) => {
                self.mark_failed(&session_id, &message_id, &error);
                self.persist();
                return None;
            }
        };

        let messages = self.request_history(&session_id, &message_id);
        self.last_stream_id += 1;
        let stream_id = self.last_stream_id;
        let cancel_token = CancellationToken::new();
        self.active = Some(ActiveGeneration {
            stream_id,
            session_id: session_id.clone(),
            message_id,
            cancel_token: cancel_token.clone(),
            phase: GenerationPhase::Requesting,
        });
        self.persist();
        debug!(
            stream_id,
            session = %session_id,
            model = %model_id,
            history = messages.len(),
            retry = retry.is_some(),
            "generation requested"
        );

        let config = self.model_config;
        Some(StreamParams {
            backend: Arc::clone(&self.backend),
            request: BackendRequest {
                endpoint: spec.endpoint(),
                api_key,
                body: ChatRequest {
                    model: spec.backend_model,
                    messages,
                    stream: true,
                    temperature: config.temperature,
                    max_tokens: config.max_tokens,
                    top_p: config.top_p,
                    frequency_penalty: config.frequency_penalty,
                    presence_penalty: config.presence_penalty,
                },
            },
            cancel_token,
            stream_id,
        })
    }

    /// Retries the current session's last assistant message if it failed.
    pub fn retry_last(&mut self) -> Option<StreamParams> {
        let payload = self
            .registry
            .current_session()?
            .last_assistant_message()
            .filter(|message| message.failed)?
            .retry_payload
            .clone()?;
        self.start_generation(Some(payload))
    }

    /// Adds `content` as a user message and starts answering it. Nothing is
    /// added while another generation is in flight.
    pub fn submit(&mut self, content: &str) -> Result<Option<StreamParams>, ChatError> {
        if self.is_generating() {
            debug!("generation in flight; not submitting");
            return Ok(None);
        }
        self.add_user_message(content)?;
        Ok(self.start_generation(None))
    }

    /// Applies one progress report from a producer task. Reports from any
    /// stream other than the active one are dropped. Returns the outcome when
    /// the report ended the generation.
    pub fn apply_stream_message(
        &mut self,
        message: StreamMessage,
        stream_id: u64,
    ) -> Option<GenerationOutcome> {
        let Some(active) = self.active.as_mut().filter(|a| a.stream_id == stream_id) else {
            debug!(stream_id, "ignoring message from stale stream");
            return None;
        };
        let session_id = active.session_id.clone();
        let message_id = active.message_id.clone();

        match message {
            StreamMessage::Started => {
                active.phase = GenerationPhase::Streaming;
                self.patch_target(&session_id, &message_id, MessagePatch::streaming());
                self.persist();
                None
            }
            StreamMessage::Chunk(fragment) => {
                if fragment.is_empty() {
                    return None;
                }
                let patch = if active.phase == GenerationPhase::Requesting {
                    active.phase = GenerationPhase::Streaming;
                    MessagePatch {
                        content: MessagePatch::append(fragment).content,
                        ..MessagePatch::streaming()
                    }
                } else {
                    MessagePatch::append(fragment)
                };
                self.patch_target(&session_id, &message_id, patch);
                self.persist();
                None
            }
            StreamMessage::End => {
                self.active = None;
                self.patch_target(&session_id, &message_id, MessagePatch::completed());
                self.persist();
                debug!(stream_id, "generation completed");
                Some(GenerationOutcome::Completed)
            }
            StreamMessage::Error(error) => {
                self.active = None;
                Some(self.finish_with_error(&session_id, &message_id, &error))
            }
        }
    }

    /// Cancels the in-flight generation and marks its message Cancelled
    /// right away. Returns false when nothing was running.
    pub fn abort_generation(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.cancel_token.cancel();
        self.finish_with_error(&active.session_id, &active.message_id, &ChatError::Cancelled);
        true
    }

    /// Applies messages from `rx` until no generation is active or the
    /// channel closes.
    pub async fn run_until_idle(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    ) -> Option<GenerationOutcome> {
        let mut outcome = None;
        while self.is_generating() {
            let Some((message, stream_id)) = rx.recv().await else {
                break;
            };
            if let Some(done) = self.apply_stream_message(message, stream_id) {
                outcome = Some(done);
            }
        }
        outcome
    }

    /// Puts the message that will receive the answer into Requesting and
    /// returns its id.
    fn prepare_target(&mut self, session_id: &str, model_id: &str, retry: bool) -> Option<String> {
        if retry {
            match self
                .registry
                .replace_last_assistant_message(session_id, MessagePatch::reset_for_retry(model_id))
            {
                Ok(message) => return Some(message.id.clone()),
                Err(ChatError::NoAssistantMessage) => {
                    debug!(session = %session_id, "nothing to retry; appending a new answer");
                }
                Err(e) => {
                    warn!(error = %e, "failed to reset message for retry");
                    return None;
                }
            }
        }

        let placeholder = Message::assistant_placeholder(model_id);
        let message_id = placeholder.id.clone();
        if let Err(e) = self.registry.push_message(session_id, placeholder) {
            warn!(error = %e, "failed to add assistant message");
            return None;
        }
        Some(message_id)
    }

    /// Conversation sent to the backend: everything before the target,
    /// minus failed answers.
    fn request_history(&self, session_id: &str, target_id: &str) -> Vec<ChatMessage> {
        let Some(session) = self.registry.session(session_id) else {
            return Vec::new();
        };
        session
            .messages
            .iter()
            .take_while(|message| message.id != target_id)
            .filter(|message| !(message.is_assistant() && message.failed))
            .map(|message| ChatMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
            })
            .collect()
    }

    fn finish_with_error(
        &mut self,
        session_id: &str,
        message_id: &str,
        error: &ChatError,
    ) -> GenerationOutcome {
        self.mark_failed(session_id, message_id, error);
        self.persist();
        if error.is_cancellation() {
            info!(session = %session_id, "generation aborted");
            GenerationOutcome::Cancelled
        } else {
            GenerationOutcome::Failed
        }
    }

    fn mark_failed(&mut self, session_id: &str, message_id: &str, error: &ChatError) {
        if !error.is_cancellation() {
            warn!(session = %session_id, error = %error, "generation failed");
        }
        let retry_payload = self.registry.last_user_input(session_id);
        self.patch_target(
            session_id,
            message_id,
            MessagePatch::failed(error.is_cancellation(), retry_payload, error.user_message()),
        );
    }

    fn patch_target(&mut self, session_id: &str, message_id: &str, patch: MessagePatch) {
        if let Err(e) = self.registry.patch_message(session_id, message_id, patch) {
            warn!(error = %e, "failed to update generating message");
        }
    }
}
