//! Ollama client for embeddings and streamed chat. Wraps ollama-rs with a simple API.
//!
//! The rest of the crate talks to the model service through the [`Embedder`]
//! and [`ChatModel`] traits, so ingestion and retrieval can run against fakes.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::shutdown::Shutdown;

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_CHAT_MODEL: &str = "llama3";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Where the model service lives and which models to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub embed_model: String,
    pub chat_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }
}

/// One user turn sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// One increment of a streamed chat answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDelta {
    pub content: String,
    /// Set on the service's final message.
    pub done: bool,
}

pub type ChatStream = BoxStream<'static, Result<ChatDelta, ChatError>>;

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Streams a chat completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat_stream(&self, messages: Vec<Message>) -> Result<ChatStream, ChatError>;
}

/// Thin wrapper around Ollama for embedding and streamed chat.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
    chat_model: String,
    shutdown: Shutdown,
}

impl OllamaClient {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            shutdown: Shutdown::never(),
        })
    }

    pub fn from_config(config: &OllamaConfig) -> Result<Self, OllamaError> {
        Ok(Self::from_url(&config.url)?
            .with_embed_model(config.embed_model.clone())
            .with_chat_model(config.chat_model.clone()))
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Set the chat model (e.g. `llama3`).
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    /// Abort in-flight requests and streams once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Embed a single string. Returns the embedding vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        debug!(model = %self.embed_model, text = %preview(text, 100), "requesting embedding");

        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Single(text.to_string()),
        );
        let res = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(EmbedError::Cancelled),
            res = self.inner.generate_embeddings(req) => res.map_err(EmbedError::from)?,
        };

        let embedding = res.embeddings.into_iter().next().unwrap_or_default();
        if embedding.is_empty() {
            return Err(EmbedError::EmptyVector);
        }
        debug!(dims = embedding.len(), "received embedding");
        Ok(embedding)
    }

    /// Start a streamed chat completion. The returned stream ends quietly on shutdown.
    pub async fn chat_stream(&self, messages: Vec<Message>) -> Result<ChatStream, ChatError> {
        let messages = messages.into_iter().map(to_ollama_message).collect();
        let req = ChatMessageRequest::new(self.chat_model.clone(), messages);
        debug!(model = %self.chat_model, "starting chat stream");

        let stream = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(ChatError::Cancelled),
            res = self.inner.send_chat_messages_stream(req) => res.map_err(ChatError::from)?,
        };

        let shutdown = self.shutdown.clone();
        let deltas = stream
            .map(|item| match item {
                Ok(res) => Ok(ChatDelta {
                    content: res.message.content,
                    done: res.done,
                }),
                Err(()) => Err(ChatError::Stream(
                    "response stream from the model service was interrupted".to_string(),
                )),
            })
            .take_until(async move { shutdown.cancelled().await });
        Ok(deltas.boxed())
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        OllamaClient::embed(self, text).await
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn chat_stream(&self, messages: Vec<Message>) -> Result<ChatStream, ChatError> {
        OllamaClient::chat_stream(self, messages).await
    }
}

fn to_ollama_message(message: Message) -> ChatMessage {
    ChatMessage::user(message.content)
}

/// First `max_chars` characters of `text`, for log lines.
pub(crate) fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
}

/// Why an embedding could not be obtained. Every variant is recoverable at the
/// level of one unit of work.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("text to embed is empty")]
    EmptyInput,
    #[error("could not reach the model service: {0}")]
    Unreachable(String),
    #[error("model service returned an error: {0}")]
    Status(String),
    #[error("could not parse embedding response: {0}")]
    Malformed(String),
    #[error("model service returned an empty embedding")]
    EmptyVector,
    #[error("embedding request cancelled")]
    Cancelled,
}

impl EmbedError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ollama_rs::error::OllamaError> for EmbedError {
    fn from(err: ollama_rs::error::OllamaError) -> Self {
        use ollama_rs::error::OllamaError as Upstream;
        match err {
            Upstream::ReqwestError(e) if e.is_decode() => Self::Malformed(e.to_string()),
            Upstream::ReqwestError(e) => Self::Unreachable(e.to_string()),
            Upstream::JsonError(e) => Self::Malformed(e.to_string()),
            Upstream::InternalError(e) => Self::Status(e.message),
            Upstream::Other(msg) => Self::Status(msg),
            other => Self::Status(other.to_string()),
        }
    }
}

/// Why a chat completion failed.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("could not reach the model service: {0}")]
    Unreachable(String),
    #[error("model service returned an error: {0}")]
    Status(String),
    #[error("could not parse chat response: {0}")]
    Malformed(String),
    #[error("{0}")]
    Stream(String),
    #[error("chat request cancelled")]
    Cancelled,
}

impl From<ollama_rs::error::OllamaError> for ChatError {
    fn from(err: ollama_rs::error::OllamaError) -> Self {
        use ollama_rs::error::OllamaError as Upstream;
        match err {
            Upstream::ReqwestError(e) => Self::Unreachable(e.to_string()),
            Upstream::JsonError(e) => Self::Malformed(e.to_string()),
            Upstream::InternalError(e) => Self::Status(e.message),
            Upstream::Other(msg) => Self::Status(msg),
            other => Self::Status(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::shutdown::shutdown_channel;

    fn client_for(server: &MockServer) -> OllamaClient {
        OllamaClient::from_url(&server.uri()).expect("mock server URL is valid")
    }

    fn chat_line(content: &str, done: bool) -> String {
        json!({
            "model": "llama3",
            "created_at": "2024-05-01T10:00:00Z",
            "message": { "role": "assistant", "content": content },
            "done": done,
        })
        .to_string()
    }

    #[test]
    fn client_configuration() {
        let config = OllamaConfig {
            url: "http://test-host:1234".to_string(),
            embed_model: "all-minilm".to_string(),
            chat_model: "mistral".to_string(),
        };
        let client = OllamaClient::from_config(&config).expect("valid URL");
        assert_eq!(client.embed_model(), "all-minilm");
        assert_eq!(client.chat_model(), "mistral");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(
            OllamaClient::from_url("not a url"),
            Err(OllamaError::ParseUrl(_))
        ));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 2), "hé");
        assert_eq!(preview("short", 100), "short");
    }

    #[tokio::test]
    async fn embed_returns_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({ "model": "nomic-embed-text", "input": "The sky is blue." })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "nomic-embed-text",
                "embeddings": [[0.1, 0.2, 0.3]],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let v = client_for(&server).embed("The sky is blue.").await.expect("embedding");
        assert_eq!(v, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn embed_reports_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "error": "model not found" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).embed("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::Status(ref msg) if msg.contains("model not found")));
    }

    #[tokio::test]
    async fn embed_reports_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("definitely not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).embed("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::Malformed(_)));
    }

    #[tokio::test]
    async fn embed_reports_empty_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[]] })))
            .mount(&server)
            .await;

        let err = client_for(&server).embed("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::EmptyVector));
    }

    #[tokio::test]
    async fn embed_reports_unreachable_service() {
        let client = OllamaClient::from_url("http://127.0.0.1:1").expect("valid URL");
        let err = client.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::Unreachable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn embed_rejects_blank_text_without_calling_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server).embed("  \n ").await.unwrap_err();
        assert!(matches!(err, EmbedError::EmptyInput));
    }

    #[tokio::test]
    async fn embed_observes_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "embeddings": [[1.0]] }))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let (trigger, shutdown) = shutdown_channel();
        let client = client_for(&server).with_shutdown(shutdown);
        trigger.trigger();
        let err = client.embed("text").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn chat_stream_yields_deltas() {
        let server = MockServer::start().await;
        let body = [
            chat_line("The sky ", false),
            chat_line("is blue.", false),
            chat_line("", true),
        ]
        .join("\n")
            + "\n";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({ "model": "llama3", "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let stream = client_for(&server)
            .chat_stream(vec![Message::user("What color is the sky?")])
            .await
            .expect("stream starts");
        let deltas: Vec<ChatDelta> = stream.map(|d| d.expect("delta")).collect().await;

        let text: String = deltas.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(text, "The sky is blue.");
        assert!(deltas.last().is_some_and(|d| d.done));
    }

    #[tokio::test]
    async fn chat_stream_observes_shutdown_before_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(chat_line("late", true) + "\n", "application/x-ndjson")
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let (trigger, shutdown) = shutdown_channel();
        let client = client_for(&server).with_shutdown(shutdown);
        trigger.trigger();
        let err = client
            .chat_stream(vec![Message::user("hi")])
            .await
            .err()
            .expect("cancelled before the response");
        assert!(matches!(err, ChatError::Cancelled));
    }

    #[tokio::test]
    async fn chat_stream_ends_quietly_on_shutdown() {
        let server = MockServer::start().await;
        let body = [chat_line("The sky ", false), chat_line("is blue.", true)].join("\n") + "\n";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let (trigger, shutdown) = shutdown_channel();
        let client = client_for(&server).with_shutdown(shutdown);
        let stream = client
            .chat_stream(vec![Message::user("hi")])
            .await
            .expect("stream starts");
        trigger.trigger();

        let items: Vec<_> = stream.collect().await;
        assert!(items.is_empty(), "stream should end without items or errors: {items:?}");
    }

    #[tokio::test]
    async fn chat_stream_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .chat_stream(vec![Message::user("hi")])
            .await
            .err()
            .expect("status error");
        assert!(matches!(err, ChatError::Status(ref msg) if msg.contains("model crashed")));
    }
}
