use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::backend::{BackendRequest, ChatBackend};
use crate::api::ChatResponse;
use crate::core::error::ChatError;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    /// The backend answered with a readable body.
    Started,
    Chunk(String),
    Error(ChatError),
    End,
}

/// A stream record that could not be decoded. Logged and skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeWarning {
    InvalidUtf8(String),
    MalformedRecord { payload: String, reason: String },
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeWarning::InvalidUtf8(reason) => write!(f, "invalid UTF-8 in stream: {reason}"),
            DecodeWarning::MalformedRecord { payload, reason } => {
                write!(f, "failed to parse stream record: {reason} - data: {payload}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Fragment(String),
    Error(ChatError),
    /// The terminal sentinel arrived.
    Done,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Incremental decoder for `text/event-stream` chat completion bodies.
///
/// Bytes are buffered until a newline arrives, so a record split across
/// reads is decoded once its line is complete. After the `[DONE]` sentinel or
/// a backend error record, further input is ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.decode_line(&line[..newline_pos], &mut events);
            if self.finished {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Decodes whatever is left in the buffer once the byte stream ends.
    pub fn finish(&mut self) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut events);
        }
        self.finished = true;
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<DecodedEvent>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("{}", DecodeWarning::InvalidUtf8(e.to_string()));
                return;
            }
        };

        let Some(payload) = extract_data_payload(line) else {
            return;
        };
        if payload.is_empty() {
            return;
        }
        if payload == DONE_SENTINEL {
            self.finished = true;
            events.push(DecodedEvent::Done);
            return;
        }

        match serde_json::from_str::<ChatResponse>(payload) {
            Ok(response) => {
                if let Some(content) = response.first_delta_content() {
                    if !content.is_empty() {
                        events.push(DecodedEvent::Fragment(content.to_string()));
                    }
                }
            }
            Err(e) => {
                if is_error_record(payload) {
                    self.finished = true;
                    events.push(DecodedEvent::Error(ChatError::transport(format_api_error(
                        payload,
                    ))));
                    return;
                }
                warn!(
                    "{}",
                    DecodeWarning::MalformedRecord {
                        payload: payload.to_string(),
                        reason: e.to_string(),
                    }
                );
            }
        }
    }
}

fn is_error_record(payload: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(payload)
        .map(|value| value.get("error").is_some())
        .unwrap_or(false)
}

struct DecodeState<S> {
    byte_stream: S,
    decoder: SseDecoder,
    pending: VecDeque<DecodedEvent>,
    exhausted: bool,
}

/// Lazily turns a byte stream into content fragments.
///
/// Ends after the byte stream ends, after the sentinel, or right after the
/// first error it yields.
pub fn decode_stream<S>(byte_stream: S) -> impl Stream<Item = Result<String, ChatError>>
where
    S: Stream<Item = Result<Vec<u8>, ChatError>> + Unpin,
{
    let state = DecodeState {
        byte_stream,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match event {
                    DecodedEvent::Fragment(fragment) => return Some((Ok(fragment), state)),
                    DecodedEvent::Error(error) => {
                        state.pending.clear();
                        state.exhausted = true;
                        return Some((Err(error), state));
                    }
                    DecodedEvent::Done => {
                        state.pending.clear();
                        state.exhausted = true;
                        continue;
                    }
                }
            }

            if state.exhausted {
                return None;
            }

            match state.byte_stream.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(error)) => {
                    state.exhausted = true;
                    return Some((Err(error), state));
                }
                None => {
                    state.exhausted = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Renders a backend error body as a short, user-facing message.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error: <empty response>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return match extract_error_summary(&json_value) {
            Some(summary) => format!("API Error: {summary}"),
            None => format!("API Error: {json_value}"),
        };
    }

    format!("API Error: {trimmed}")
}

pub struct StreamParams {
    pub backend: Arc<dyn ChatBackend>,
    pub request: BackendRequest,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Runs generations in background tasks and reports their progress over a
/// channel, tagged with the stream id they belong to.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) -> tokio::task::JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                backend,
                request,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                _ = run_stream(backend.as_ref(), request, cancel_token.clone(), &tx, stream_id) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "stream cancelled");
                    let _ = tx.send((StreamMessage::Error(ChatError::Cancelled), stream_id));
                }
            }
        })
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

async fn run_stream(
    backend: &dyn ChatBackend,
    request: BackendRequest,
    cancel_token: CancellationToken,
    tx: &mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
) {
    let byte_stream = match backend.open_stream(request, cancel_token.clone()).await {
        Ok(byte_stream) => byte_stream,
        Err(error) => {
            let _ = tx.send((StreamMessage::Error(error), stream_id));
            return;
        }
    };
    let _ = tx.send((StreamMessage::Started, stream_id));

    let mut fragments = Box::pin(decode_stream(byte_stream));
    while let Some(item) = fragments.next().await {
        if cancel_token.is_cancelled() {
            let _ = tx.send((StreamMessage::Error(ChatError::Cancelled), stream_id));
            return;
        }
        match item {
            Ok(fragment) => {
                let _ = tx.send((StreamMessage::Chunk(fragment), stream_id));
            }
            Err(error) => {
                let _ = tx.send((StreamMessage::Error(error), stream_id));
                return;
            }
        }
    }

    let _ = tx.send((StreamMessage::End, stream_id));
}
