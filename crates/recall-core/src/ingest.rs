//! Ingestion pipeline: scan → chunk → embed → store.
//!
//! A load replaces the whole corpus. The store lock is held from the clear
//! until the last chunk is appended, so readers see either the old corpus or
//! the new one. One bad file or chunk never aborts the load; it is recorded
//! in the returned [`LoadSummary`] instead.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::chunks::{chunk_text, ChunkingConfig};
use crate::documents::{read_document, scan_documents, ScanError};
use crate::ollama::Embedder;
use crate::store::SharedStore;

/// Result of a load the user did not cancel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Files that were read and chunked, whether or not every chunk embedded.
    pub files_processed: usize,
    pub chunks_loaded: usize,
    /// Files and chunks that were left out, with the reason.
    pub skipped: Vec<SkippedItem>,
    /// Set when process shutdown stopped the load early.
    pub interrupted: bool,
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {} files, loaded {} chunks",
            self.files_processed, self.chunks_loaded
        )
    }
}

/// A file (`chunk_index: None`) or a single chunk that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub source: String,
    pub chunk_index: Option<usize>,
    pub reason: String,
}

/// What a "load documents" action ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(LoadSummary),
    /// No directory was chosen. The store was left untouched.
    Cancelled,
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded(summary) => summary.fmt(f),
            Self::Cancelled => f.write_str("document loading cancelled (no directory selected)"),
        }
    }
}

/// Runs a user-initiated load. `dir` is the picker's answer: `None` or an
/// empty path means the user dismissed it, which leaves the current corpus in place.
pub async fn load_documents(
    dir: Option<&Path>,
    store: &SharedStore,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
) -> Result<LoadOutcome, IngestError> {
    let Some(root) = dir.filter(|p| !p.as_os_str().is_empty()) else {
        info!("document loading cancelled by user");
        return Ok(LoadOutcome::Cancelled);
    };
    ingest_directory(root, store, embedder, chunking)
        .await
        .map(LoadOutcome::Loaded)
}

/// Clears `store` and repopulates it from the `.txt` files in `root`.
///
/// The directory is listed on the blocking pool before the store is locked.
/// Fails only if `root` cannot be enumerated, in which case the store is left empty.
pub async fn ingest_directory(
    root: &Path,
    store: &SharedStore,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
) -> Result<LoadSummary, IngestError> {
    info!(dir = %root.display(), "loading documents");
    let scan_root = root.to_path_buf();
    let scanned = tokio::task::spawn_blocking(move || scan_documents(&scan_root)).await;

    let mut guard = store.lock().await;
    guard.clear();
    let docs = scanned??;
    let mut summary = LoadSummary::default();

    'files: for doc in docs {
        let text = match read_document(&doc.path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(source = %doc.name, error = %e, "skipping unreadable file");
                summary.skipped.push(SkippedItem {
                    source: doc.name,
                    chunk_index: None,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let chunks = chunk_text(&text, chunking);
        info!(source = %doc.name, chunks = chunks.len(), "chunked document");

        for (index, chunk) in chunks.into_iter().enumerate() {
            if chunk.trim().is_empty() {
                debug!(source = %doc.name, chunk = index, "skipping blank chunk");
                continue;
            }
            match embedder.embed(&chunk).await {
                Ok(vector) => {
                    let id = guard.append(chunk, vector, doc.name.as_str());
                    debug!(source = %doc.name, chunk = index, id, "stored chunk");
                    summary.chunks_loaded += 1;
                }
                Err(e) if e.is_cancelled() => {
                    warn!(source = %doc.name, "shutdown requested; stopping document load");
                    summary.files_processed += 1;
                    summary.interrupted = true;
                    break 'files;
                }
                Err(e) => {
                    warn!(source = %doc.name, chunk = index, error = %e, "skipping chunk");
                    summary.skipped.push(SkippedItem {
                        source: doc.name.clone(),
                        chunk_index: Some(index),
                        reason: e.to_string(),
                    });
                }
            }
        }
        summary.files_processed += 1;
    }
    drop(guard);

    info!(
        files = summary.files_processed,
        chunks = summary.chunks_loaded,
        skipped = summary.skipped.len(),
        "finished loading documents from {}",
        root.display()
    );
    Ok(summary)
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("could not read document directory: {0}")]
    Scan(#[from] ScanError),
    #[error("directory scan task failed: {0}")]
    ScanTask(#[from] tokio::task::JoinError),
}
