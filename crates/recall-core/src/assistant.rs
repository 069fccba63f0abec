//! Retrieval-augmented chat turns.
//!
//! One turn embeds the user's question, ranks the current corpus snapshot,
//! decides whether the best matches are relevant enough to use, and then
//! streams the model's answer. Progress reaches the presentation layer as
//! [`ChatEvent`]s over a channel: the source list first, then tokens, then a
//! single `Done` carrying timing and any error text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ollama::{preview, ChatError, ChatModel, EmbedError, Embedder, Message};
use crate::rank::{find_relevant_chunks, RankedChunk, DEFAULT_TOP_N};
use crate::shutdown::Shutdown;
use crate::store::SharedStore;

/// Minimum top score for retrieved context to be used.
pub const DEFAULT_RELEVANCE_THRESHOLD: f32 = 0.5;

const CONTEXT_PREAMBLE: &str = "Use the following context to answer the user's question:";
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// How retrieved chunks are chosen for a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_n: usize,
    /// `None` always uses the top-N, however low they score. A config file
    /// can get the same effect with `-1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_threshold: Option<f32>,
    /// Drop individual chunks under the threshold from an accepted top-N.
    pub filter_chunks_below_threshold: bool,
    /// Report the top-N as sources even when the gate rejected them.
    pub surface_rejected_sources: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            relevance_threshold: Some(DEFAULT_RELEVANCE_THRESHOLD),
            filter_chunks_below_threshold: false,
            surface_rejected_sources: false,
        }
    }
}

/// Provenance of one chunk shown alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub file_name: String,
    pub chunk_id: u64,
    pub score: f32,
}

impl From<&RankedChunk> for SourceInfo {
    fn from(ranked: &RankedChunk) -> Self {
        Self {
            file_name: ranked.record.source_name.clone(),
            chunk_id: ranked.record.id,
            score: ranked.score,
        }
    }
}

/// Timing for a finished turn, plus the error that ended it, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub elapsed_ms: u64,
    pub chars_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamStats {
    fn new(elapsed: Duration, chars: usize, error: Option<String>) -> Self {
        let secs = elapsed.as_secs_f64();
        let chars_per_second = if secs > 0.0 && chars > 0 {
            chars as f64 / secs
        } else {
            0.0
        };
        Self {
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            chars_per_second,
            error,
        }
    }
}

/// What the presentation layer receives during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ChatEvent {
    /// Sent once, before generation starts. Empty when no context was used.
    Sources(Vec<SourceInfo>),
    Token(String),
    Done(StreamStats),
}

/// The prompt and provenance decided for one user message.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTurn {
    pub prompt: String,
    pub sources: Vec<SourceInfo>,
    pub used_context: bool,
}

impl PreparedTurn {
    fn raw(input: &str, sources: Vec<SourceInfo>) -> Self {
        Self {
            prompt: input.to_string(),
            sources,
            used_context: false,
        }
    }
}

/// Runs chat turns against the shared corpus.
pub struct Assistant {
    store: SharedStore,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    config: RetrievalConfig,
    shutdown: Shutdown,
}

impl Assistant {
    pub fn new(
        store: SharedStore,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
            config,
            shutdown: Shutdown::never(),
        }
    }

    /// Streams stop quietly once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Embeds `input`, retrieves from the current snapshot, applies the
    /// relevance gate and assembles the prompt. Fails only if the question
    /// itself cannot be embedded.
    pub async fn prepare_turn(&self, input: &str) -> Result<PreparedTurn, TurnError> {
        let query = self.embedder.embed(input).await?;

        let snapshot = self.store.snapshot().await;
        if snapshot.is_empty() {
            info!("document store is empty; sending the question without context");
            return Ok(PreparedTurn::raw(input, Vec::new()));
        }

        let ranked = find_relevant_chunks(&snapshot, &query, self.config.top_n);
        for (rank, chunk) in ranked.iter().enumerate() {
            debug!(
                rank = rank + 1,
                id = chunk.record.id,
                source = %chunk.record.source_name,
                score = chunk.score,
                "selected relevant chunk"
            );
        }

        let Some(top) = ranked.first().map(|r| r.score) else {
            info!("no comparable chunks found; sending the question without context");
            return Ok(PreparedTurn::raw(input, Vec::new()));
        };
        if let Some(threshold) = self.config.relevance_threshold {
            if top < threshold {
                info!(top, threshold, "top score below relevance threshold; skipping context");
                let sources = if self.config.surface_rejected_sources {
                    ranked.iter().map(SourceInfo::from).collect()
                } else {
                    Vec::new()
                };
                return Ok(PreparedTurn::raw(input, sources));
            }
        }

        let used: Vec<RankedChunk> = match self.config.relevance_threshold {
            Some(threshold) if self.config.filter_chunks_below_threshold => {
                ranked.into_iter().filter(|r| r.score >= threshold).collect()
            }
            _ => ranked,
        };
        let prompt = build_prompt(input, &used);
        info!(chunks = used.len(), top, prompt_chars = prompt.len(), "using retrieved context");
        Ok(PreparedTurn {
            prompt,
            sources: used.iter().map(SourceInfo::from).collect(),
            used_context: true,
        })
    }

    /// Handles one user message. Emits the source list, then spawns the
    /// streamed answer and returns its handle without waiting for it.
    ///
    /// If the question cannot be embedded, a `Done` event with the error is
    /// sent and the error is returned; no generation happens.
    pub async fn handle_message(
        &self,
        input: &str,
        events: UnboundedSender<ChatEvent>,
    ) -> Result<JoinHandle<StreamStats>, TurnError> {
        info!(input = %preview(input, 100), "handling message");
        let turn = match self.prepare_turn(input).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(error = %e, "chat turn aborted");
                let stats = StreamStats::new(Duration::ZERO, 0, Some(e.to_string()));
                let _ = events.send(ChatEvent::Done(stats));
                return Err(e);
            }
        };

        let _ = events.send(ChatEvent::Sources(turn.sources));
        let messages = vec![Message::user(turn.prompt)];
        Ok(tokio::spawn(stream_answer(
            Arc::clone(&self.chat),
            messages,
            events,
            self.shutdown.clone(),
        )))
    }
}

/// Builds the augmented prompt. With no chunks the prompt is the bare question.
pub fn build_prompt(input: &str, chunks: &[RankedChunk]) -> String {
    if chunks.is_empty() {
        return input.to_string();
    }
    let context = chunks
        .iter()
        .map(|c| {
            format!(
                "Context from document '{}' (Chunk {}, Relevance: {:.2}):\n{}",
                c.record.source_name, c.record.id, c.score, c.record.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    format!("{CONTEXT_PREAMBLE}\n\n{context}\n\nUser's question: {input}")
}

/// Streams a chat completion into `events`, finishing with exactly one
/// `Done`. Shutdown ends the stream without an error.
pub async fn stream_answer(
    chat: Arc<dyn ChatModel>,
    messages: Vec<Message>,
    events: UnboundedSender<ChatEvent>,
    shutdown: Shutdown,
) -> StreamStats {
    let started = Instant::now();
    let mut chars = 0usize;

    let error = match chat.chat_stream(messages).await {
        Err(ChatError::Cancelled) => None,
        Err(e) => Some(e.to_string()),
        Ok(mut stream) => loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => break None,
                next = stream.next() => next,
            };
            match next {
                None => break None,
                Some(Ok(delta)) => {
                    if !delta.content.is_empty() {
                        chars += delta.content.chars().count();
                        let _ = events.send(ChatEvent::Token(delta.content));
                    }
                    if delta.done {
                        break None;
                    }
                }
                Some(Err(ChatError::Cancelled)) => break None,
                Some(Err(e)) => break Some(e.to_string()),
            }
        },
    };

    let stats = StreamStats::new(started.elapsed(), chars, error);
    match &stats.error {
        Some(e) => warn!(error = %e, elapsed_ms = stats.elapsed_ms, "answer stream failed"),
        None => info!(
            chars,
            elapsed_ms = stats.elapsed_ms,
            chars_per_second = stats.chars_per_second,
            "answer stream finished"
        ),
    }
    let _ = events.send(ChatEvent::Done(stats.clone()));
    stats
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("could not embed your message: {0}")]
    Embed(#[from] EmbedError),
}
