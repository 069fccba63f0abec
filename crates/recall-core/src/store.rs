//! In-memory vector store for chunk embeddings. Supports clear, append and snapshot.
//! No persistence; the store is discarded when the process exits.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

/// A stored chunk: its text, embedding, and the document it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    /// Sequential id, starting at 1 for every freshly loaded corpus.
    pub id: u64,
    pub text: String,
    pub vector: Vec<f32>,
    /// File name of the originating document. Provenance only, not identity.
    pub source_name: String,
}

/// Ordered collection of chunk records. Insertion order equals id order.
#[derive(Debug)]
pub struct VectorStore {
    records: Vec<Arc<ChunkRecord>>,
    next_id: u64,
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStore {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
        }
    }

    /// Drops every record and restarts ids at 1.
    pub fn clear(&mut self) {
        self.records.clear();
        self.next_id = 1;
    }

    /// Stores a chunk under the next sequential id and returns that id.
    pub fn append(
        &mut self,
        text: impl Into<String>,
        vector: Vec<f32>,
        source_name: impl Into<String>,
    ) -> u64 {
        let id = self.next_id;
        self.records.push(Arc::new(ChunkRecord {
            id,
            text: text.into(),
            vector,
            source_name: source_name.into(),
        }));
        self.next_id += 1;
        id
    }

    pub fn records(&self) -> &[Arc<ChunkRecord>] {
        &self.records
    }

    /// Consistent read-only copy of the current records. Records are shared, not cloned.
    pub fn snapshot(&self) -> Vec<Arc<ChunkRecord>> {
        self.records.clone()
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Handle to the corpus shared by the ingestion pipeline (writer) and the
/// retrieval policy (reader). One mutex guards the records and the id counter together.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<VectorStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access for the whole of a clear-and-repopulate run.
    pub async fn lock(&self) -> MutexGuard<'_, VectorStore> {
        self.inner.lock().await
    }

    /// Holds the lock only long enough to copy the record list.
    pub async fn snapshot(&self) -> Vec<Arc<ChunkRecord>> {
        self.inner.lock().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
