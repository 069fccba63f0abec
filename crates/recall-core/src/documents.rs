//! Discovering and reading text documents from a user-chosen directory.
//!
//! Only the top level of the directory is considered; subdirectories and
//! files with other extensions are ignored.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Extension of loadable documents, compared case-insensitively.
pub const DOCUMENT_EXTENSION: &str = "txt";

/// A document we found: its path and the file name used as provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub path: PathBuf,
    pub name: String,
}

/// Lists the `.txt` files directly inside `root`, sorted by file name.
///
/// Fails only if `root` itself cannot be read. Unreadable entries inside it are skipped.
pub fn scan_documents(root: &Path) -> Result<Vec<DocumentFile>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(ScanError::Walk(e.to_string())),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_document(entry.path()) {
            docs.push(DocumentFile {
                path: entry.path().to_path_buf(),
                name: entry.file_name().to_string_lossy().into_owned(),
            });
        }
    }
    Ok(docs)
}

/// Reads a document's full text. Non-UTF-8 content is an error.
pub async fn read_document(path: &Path) -> Result<String, ScanError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ScanError::Read(path.to_path_buf(), e))
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}
