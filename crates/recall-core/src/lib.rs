//! All backend logic independent of how the app is run.
//!
//! Documents live in a folder the user chooses. They are chunked, embedded
//! through a local Ollama service and held in memory only; each chat turn
//! retrieves the most similar chunks and streams an answer grounded in them.
//! Recall stores only its config in its own app data directory (see [app_data]).

pub mod app_data;
pub mod assistant;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod ingest;
pub mod ollama;
pub mod rank;
pub mod shutdown;
pub mod store;

pub use app_data::app_data_dir;
pub use assistant::{
    build_prompt, stream_answer, Assistant, ChatEvent, PreparedTurn, RetrievalConfig, SourceInfo,
    StreamStats, TurnError,
};
pub use chunks::{chunk_text, ChunkStrategy, ChunkingConfig};
pub use config::{
    get_documents_root, load_config, save_config, set_documents_root, Config, ConfigError,
};
pub use documents::{read_document, scan_documents, DocumentFile, ScanError};
pub use ingest::{ingest_directory, load_documents, IngestError, LoadOutcome, LoadSummary, SkippedItem};
pub use ollama::{
    ChatDelta, ChatError, ChatModel, ChatStream, EmbedError, Embedder, Message, OllamaClient,
    OllamaConfig, OllamaError,
};
pub use rank::{cosine_similarity, find_relevant_chunks, RankedChunk, SimilarityError};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use store::{ChunkRecord, SharedStore, VectorStore};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "recall-core ready"
}
