//! Backend call contract and the HTTP implementation.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ChatRequest;
use crate::core::chat_stream::format_api_error;
use crate::core::error::ChatError;

/// Raw response body, chunk by chunk, as delivered by the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ChatError>> + Send>>;

/// Everything needed to issue one streamed chat completion.
#[derive(Debug)]
pub struct BackendRequest {
    pub endpoint: String,
    pub api_key: String,
    pub body: ChatRequest,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Opens a streamed completion. Resolves once the response body is
    /// readable; rejects with [`ChatError::Cancelled`] when `cancel_token`
    /// fires first and with [`ChatError::Transport`] on any other failure.
    async fn open_stream(
        &self,
        request: BackendRequest,
        cancel_token: CancellationToken,
    ) -> Result<ByteStream, ChatError>;
}

pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// Client with a 60 second connect timeout. Fails when the TLS backend
    /// cannot be initialized.
    pub fn new() -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ChatError::transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn open_stream(
        &self,
        request: BackendRequest,
        cancel_token: CancellationToken,
    ) -> Result<ByteStream, ChatError> {
        let BackendRequest {
            endpoint,
            api_key,
            body,
        } = request;
        debug!(%endpoint, model = %body.model, messages = body.messages.len(), "opening chat stream");

        let send = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .bearer_auth(api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(ChatError::Cancelled),
            result = send => result.map_err(|e| ChatError::transport(format_api_error(&e.to_string())))?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            debug!(%status, "chat stream rejected");
            return Err(ChatError::transport(format_api_error(&error_text)));
        }

        let byte_stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| ChatError::transport(format!("Error in HTTP stream: {e}")))
        });
        Ok(Box::pin(byte_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatMessage;

    fn request(endpoint: &str) -> BackendRequest {
        BackendRequest {
            endpoint: endpoint.to_string(),
            api_key: "sk-test".to_string(),
            body: ChatRequest {
                model: "gpt-4".to_string(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                }],
                stream: true,
                temperature: 0.7,
                max_tokens: 1000,
                top_p: 1.0,
                frequency_penalty: 0.0,
                presence_penalty: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn cancelled_token_rejects_before_sending() {
        let backend = HttpBackend::new().expect("client");
        let token = CancellationToken::new();
        token.cancel();

        let result = backend
            .open_stream(request("http://127.0.0.1:9/v1/chat/completions"), token)
            .await;
        assert!(matches!(result, Err(ChatError::Cancelled)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let backend = HttpBackend::new().expect("client");
        let result = backend
            .open_stream(request("http://127.0.0.1:9/v1/chat/completions"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ChatError::Transport(_))));
    }

    #[test]
    fn new_reports_client_construction_as_result() {
        let backend: Result<HttpBackend, ChatError> = HttpBackend::new();
        assert!(backend.is_ok());
    }

    #[test]
    fn request_body_carries_sampling_parameters() {
        let value = serde_json::to_value(&request("https://x").body).expect("serialize");
        assert_eq!(value["stream"], true);
        assert_eq!(value["max_tokens"], 1000);
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value.get("presence_penalty").is_some());
    }
}
