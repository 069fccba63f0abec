//! Splits document text into overlapping chunks for embedding and search.
//!
//! Two strategies are available. The recursive splitter prefers paragraph
//! boundaries, then line breaks, sentence and clause punctuation, spaces, and
//! finally falls back to fixed-width character windows. The fixed-width
//! splitters work on Unicode scalar values (`char`) or on whitespace-separated
//! words re-joined with a single space.

use serde::{Deserialize, Serialize};

/// Default target size for character-based chunking.
pub const DEFAULT_TARGET_CHARS: usize = 1000;
/// Default overlap between adjacent character windows.
pub const DEFAULT_OVERLAP_CHARS: usize = 100;
/// Default target size for word-based chunking.
pub const DEFAULT_TARGET_WORDS: usize = 200;
/// Default overlap between adjacent word windows.
pub const DEFAULT_OVERLAP_WORDS: usize = 20;

/// Separators tried by the recursive splitter, coarsest first. The trailing
/// empty string means "fall through to character windows".
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " ", ""];

/// Which splitting algorithm to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    #[default]
    Recursive,
    FixedChars,
    FixedWords,
}

/// Chunking settings. Sizes left unset fall back to the defaults of the
/// chosen strategy (characters for `recursive`/`fixed_chars`, words for `fixed_words`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap: Option<usize>,
}

impl ChunkingConfig {
    pub fn target_size(&self) -> usize {
        self.target_size.unwrap_or(match self.strategy {
            ChunkStrategy::FixedWords => DEFAULT_TARGET_WORDS,
            _ => DEFAULT_TARGET_CHARS,
        })
    }

    pub fn overlap(&self) -> usize {
        self.overlap.unwrap_or(match self.strategy {
            ChunkStrategy::FixedWords => DEFAULT_OVERLAP_WORDS,
            _ => DEFAULT_OVERLAP_CHARS,
        })
    }
}

/// Chunk one document's text with the configured strategy.
/// Empty input yields no chunks; no returned chunk is blank.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let size = config.target_size();
    let overlap = config.overlap();
    match config.strategy {
        ChunkStrategy::Recursive => split_recursive(text, size, overlap),
        ChunkStrategy::FixedChars => split_fixed_chars(text, size, overlap),
        ChunkStrategy::FixedWords => split_fixed_words(text, size, overlap),
    }
}

/// Fixed-width character windows of `size` chars, each starting
/// `size - overlap` chars after the previous one.
///
/// An overlap that would stall the window is clamped to `size / 5` (at least 1),
/// or to 0 when the window is a single character. `size == 0` returns the whole
/// text as one chunk.
pub fn split_fixed_chars(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![text.to_string()];
    }
    let overlap = clamp_char_overlap(size, overlap);

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < n {
        let end = (start + size).min(n);
        let window = &text[bounds[start]..bounds[end]];
        if !window.trim().is_empty() {
            chunks.push(window.to_string());
        }
        if end == n {
            break;
        }
        start += size - overlap;
    }
    chunks
}

/// Fixed-width word windows. Words are whitespace-separated and re-joined
/// with a single space.
///
/// `size == 0` falls back to [`DEFAULT_TARGET_WORDS`]; an overlap that would
/// stall the window is clamped to `size / 4`.
pub fn split_fixed_words(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let size = if size == 0 { DEFAULT_TARGET_WORDS } else { size };
    let overlap = if overlap >= size { size / 4 } else { overlap };

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += size - overlap;
    }
    chunks
}

/// Recursive separator-cascade splitting with [`DEFAULT_SEPARATORS`].
pub fn split_recursive(text: &str, size: usize, overlap: usize) -> Vec<String> {
    split_recursive_with(text, size, overlap, DEFAULT_SEPARATORS)
}

/// Recursive separator-cascade splitting with a caller-supplied separator list.
///
/// Pieces that still exceed `size` are split again with the next (finer)
/// separator; small neighbours are then greedily merged back up to `size`.
/// Once the separators are exhausted, character windows with `overlap`
/// guarantee termination.
pub fn split_recursive_with(
    text: &str,
    size: usize,
    overlap: usize,
    separators: &[&str],
) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        tracing::warn!("recursive chunking called with a zero target size; keeping text whole");
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }
    let overlap = clamp_char_overlap(size, overlap);
    split_level(text, size, overlap, separators)
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect()
}

fn split_level(text: &str, size: usize, overlap: usize, separators: &[&str]) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let only_char_level = separators.iter().all(|s| s.is_empty());
    if only_char_level && text.chars().count() <= size {
        return vec![text.to_string()];
    }
    let Some((&sep, finer)) = separators.split_first() else {
        return split_fixed_chars(text, size, overlap);
    };
    if sep.is_empty() {
        return split_fixed_chars(text, size, overlap);
    }

    let mut pieces = Vec::new();
    for piece in text.split(sep).filter(|p| !p.is_empty()) {
        if piece.chars().count() > size {
            pieces.extend(split_level(piece, size, overlap, finer));
        } else {
            pieces.push(piece.to_string());
        }
    }
    merge_pieces(pieces, sep, size)
}

/// Greedily joins neighbouring pieces with `sep` while the result stays within `size` chars.
fn merge_pieces(pieces: Vec<String>, sep: &str, size: usize) -> Vec<String> {
    let sep_len = sep.chars().count();
    let mut merged = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0;

    for piece in pieces {
        let piece_len = piece.chars().count();
        if buffer.is_empty() {
            buffer = piece;
            buffer_len = piece_len;
        } else if buffer_len + sep_len + piece_len > size {
            merged.push(std::mem::replace(&mut buffer, piece));
            buffer_len = piece_len;
        } else {
            buffer.push_str(sep);
            buffer.push_str(&piece);
            buffer_len += sep_len + piece_len;
        }
    }
    if !buffer.is_empty() {
        merged.push(buffer);
    }
    merged
}

fn clamp_char_overlap(size: usize, overlap: usize) -> usize {
    if overlap < size {
        return overlap;
    }
    let clamped = (size / 5).max(1);
    if clamped >= size {
        0
    } else {
        clamped
    }
}
