//! Cosine similarity and exact top-N ranking over a store snapshot.
//!
//! Ranking is a linear scan. Corpora are a folder of personal documents,
//! small enough that no index is kept.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::store::ChunkRecord;

/// Number of chunks retrieved when the caller asks for zero.
pub const DEFAULT_TOP_N: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("vectors must not be empty")]
    Empty,
    #[error("vectors must have the same length (left: {left}, right: {right})")]
    DimensionMismatch { left: usize, right: usize },
}

/// `dot(a, b) / (|a| * |b|)`.
///
/// Empty or differently sized vectors are an error. A zero-magnitude vector
/// has similarity 0 with anything, as does a vector holding NaN or infinity.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.is_empty() || b.is_empty() {
        return Err(SimilarityError::Empty);
    }
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    // Accumulate in f64 so large components cannot overflow the squares.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    let score = dot / denom;
    if !score.is_finite() {
        return Ok(0.0);
    }
    Ok(score as f32)
}

/// A stored chunk together with its similarity to one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub record: Arc<ChunkRecord>,
    pub score: f32,
}

/// Scores every record against `query` and returns the best `top_n`,
/// highest score first, ties broken by lower id.
///
/// Records with no vector are skipped. A record whose vector does not match
/// the query's dimensionality scores 0 instead of failing the scan.
pub fn find_relevant_chunks(
    records: &[Arc<ChunkRecord>],
    query: &[f32],
    top_n: usize,
) -> Vec<RankedChunk> {
    if records.is_empty() || query.is_empty() {
        return Vec::new();
    }
    let top_n = if top_n == 0 { DEFAULT_TOP_N } else { top_n };

    let mut scored: Vec<RankedChunk> = records
        .iter()
        .filter(|record| {
            let keep = !record.vector.is_empty();
            if !keep {
                debug!(id = record.id, source = %record.source_name, "skipping chunk with empty embedding");
            }
            keep
        })
        .map(|record| {
            let score = cosine_similarity(query, &record.vector).unwrap_or_else(|err| {
                debug!(id = record.id, source = %record.source_name, %err, "scoring chunk as 0");
                0.0
            });
            RankedChunk {
                record: Arc::clone(record),
                score,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    scored.truncate(top_n);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorStore;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = [0.3, -1.2, 4.0, 0.7];
        let b = [1.1, 0.4, -0.5, 2.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn similarity_with_self_is_one() {
        let a = [0.3, -1.2, 4.0, 0.7];
        let s = cosine_similarity(&a, &a).expect("same length");
        assert!(approx(s, 1.0), "got {s}");
    }

    #[test]
    fn orthogonal_and_opposite_vectors() {
        assert!(approx(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0));
        assert!(approx(cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]).unwrap(), -1.0));
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), Ok(0.0));
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), Ok(0.0));
    }

    #[test]
    fn large_components_do_not_overflow() {
        let big = [3e19, 4e19];
        let s = cosine_similarity(&big, &big).expect("same length");
        assert!(approx(s, 1.0), "got {s}");

        let other = [4e19, 3e19];
        let s = cosine_similarity(&big, &other).expect("same length");
        assert!(approx(s, 0.96), "got {s}");
    }

    #[test]
    fn non_finite_components_score_zero() {
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), Ok(0.0));
        assert_eq!(cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 1.0]), Ok(0.0));
    }

    #[test]
    fn non_finite_vector_cannot_outrank_a_real_match() {
        let mut store = VectorStore::new();
        store.append("broken", vec![f32::NAN, 0.0], "a.txt");
        store.append("match", vec![1.0, 0.0], "b.txt");

        let ranked = find_relevant_chunks(store.records(), &[1.0, 0.0], 2);
        assert_eq!(ranked[0].record.text, "match");
        assert_eq!(ranked[1].score, 0.0);
    }

    #[test]
    fn empty_and_mismatched_vectors_are_errors() {
        assert_eq!(cosine_similarity(&[], &[1.0]), Err(SimilarityError::Empty));
        assert_eq!(
            cosine_similarity(&[1.0, 2.0], &[1.0]),
            Err(SimilarityError::DimensionMismatch { left: 2, right: 1 })
        );
    }

    #[test]
    fn ranking_returns_top_n_descending() {
        let mut store = VectorStore::new();
        store.append("far", vec![0.0, 1.0], "a.txt");
        store.append("near", vec![1.0, 0.1], "a.txt");
        store.append("middle", vec![1.0, 1.0], "b.txt");
        store.append("exact", vec![1.0, 0.0], "b.txt");

        let ranked = find_relevant_chunks(store.records(), &[1.0, 0.0], 3);
        let texts: Vec<&str> = ranked.iter().map(|r| r.record.text.as_str()).collect();
        assert_eq!(texts, vec!["exact", "near", "middle"]);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn ties_are_broken_by_lower_id() {
        let mut store = VectorStore::new();
        store.append("first", vec![2.0, 0.0], "a.txt");
        store.append("other", vec![0.0, 1.0], "a.txt");
        store.append("second", vec![1.0, 0.0], "a.txt");

        let ranked = find_relevant_chunks(store.records(), &[1.0, 0.0], 2);
        let ids: Vec<u64> = ranked.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn zero_top_n_uses_default() {
        let mut store = VectorStore::new();
        for i in 0..5 {
            store.append(format!("c{i}"), vec![1.0, i as f32], "a.txt");
        }
        assert_eq!(find_relevant_chunks(store.records(), &[1.0, 0.0], 0).len(), DEFAULT_TOP_N);
    }

    #[test]
    fn empty_store_yields_empty_ranking() {
        assert!(find_relevant_chunks(&[], &[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn bad_stored_vectors_do_not_abort_the_scan() {
        let mut store = VectorStore::new();
        store.append("empty", Vec::new(), "a.txt");
        store.append("short", vec![1.0], "a.txt");
        store.append("zero", vec![0.0, 0.0], "a.txt");
        store.append("good", vec![0.5, 0.5], "a.txt");

        let ranked = find_relevant_chunks(store.records(), &[1.0, 0.0], 10);
        assert_eq!(ranked.len(), 3, "empty vector is skipped");
        assert_eq!(ranked[0].record.text, "good");
        assert_eq!(ranked[1].score, 0.0);
        assert_eq!(ranked[2].score, 0.0);
        assert_eq!(ranked[1].record.text, "short");
    }

    #[test]
    fn basic_retrieval_prefers_matching_chunk() {
        // Axes: [colour/sky, geography/capital]
        let mut store = VectorStore::new();
        store.append("The sky is blue.", vec![0.9, 0.1], "sky.txt");
        store.append("Paris is the capital of France.", vec![0.1, 0.9], "paris.txt");

        let query = [0.8, 0.2]; // "What color is the sky?"
        let ranked = find_relevant_chunks(store.records(), &query, 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.text, "The sky is blue.");

        let all = find_relevant_chunks(store.records(), &query, 2);
        assert!(all[0].score > all[1].score);
    }
}
