//! # Vector Index — Brute-Force Cosine Scan
//!
//! The in-memory mirror of every embedded chunk, queried once per question
//! to rank the corpus against the question's own embedding.
//!
//! ## Why brute force
//!
//! Corpora here are personal-scale (spec.md rationale: documents + chunks
//! ≤ ~10⁴), so an approximate nearest-neighbor structure (HNSW, IVF, ...)
//! buys nothing but complexity. A full scan over `N` unit-norm `dim`-f32
//! vectors costs `O(N * dim)` per query — at `N = 10_000`, `dim = 384` that's
//! four million multiply-adds, sub-millisecond on any modern CPU.
//!
//! ## Why a dot product is cosine similarity here
//!
//! `embed::EmbedderHandle` L2-normalizes every vector before it ever reaches
//! this index, so `cos(a, b) = (a · b) / (|a| |b|) = a · b` — the division
//! is already paid for at embed time, once, instead of at every query.
//!
//! ## Tie-break
//!
//! Insertion order is preserved in `chunks`, and [`VectorIndex::top_k`]'s
//! sort is stable, so two chunks scoring identically keep the order they
//! were ingested in rather than an arbitrary one.

use crate::model::Chunk;

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Default)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: chunks.into_iter().filter(|c| c.is_embedded()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Inserts a chunk. Chunks without an embedding are never mirrored —
    /// they simply aren't inserted until a later reindex assigns one.
    pub fn push(&mut self, chunk: Chunk) {
        if chunk.is_embedded() {
            self.chunks.push(chunk);
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Replaces one chunk's embedding in place, preserving its position (and
    /// therefore its tie-break rank) — used by reindex.
    pub fn update_embedding(&mut self, chunk_id: &str, embedding: Vec<f32>) {
        if let Some(c) = self.chunks.iter_mut().find(|c| c.id == chunk_id) {
            c.embedding = Some(embedding);
        }
    }

    /// Returns the `k` chunks with the greatest `dot(query, embedding)`,
    /// sorted score-descending, ties broken by insertion order. At most `k`
    /// results; chunks without an embedding never appear (none are stored
    /// without one).
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.embedding.as_ref().map(|e| (i, dot(query, e))))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn unit_chunk(id: &str, dim: usize, axis: usize) -> Chunk {
        let mut v = vec![0.0f32; dim];
        v[axis] = 1.0;
        Chunk {
            id: id.to_string(),
            doc_id: Uuid::nil(),
            doc_name: "doc".into(),
            page: 1,
            text: "x".repeat(40),
            embedding: Some(v),
        }
    }

    #[test]
    fn top_k_is_deterministic_and_respects_axis_aligned_query() {
        let mut index = VectorIndex::new();
        for i in 0..10 {
            index.push(unit_chunk(&format!("c{i}"), 10, i));
        }
        let mut q = vec![0.0f32; 10];
        q[3] = 1.0;
        let results = index.top_k(&q, 6);
        assert_eq!(results.len(), 6);
        assert_eq!(results[0].chunk.id, "c3");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn chunks_without_embedding_never_appear() {
        let mut index = VectorIndex::new();
        index.push(Chunk {
            id: "noemb".into(),
            doc_id: Uuid::nil(),
            doc_name: "doc".into(),
            page: 1,
            text: "x".repeat(40),
            embedding: None,
        });
        assert!(index.is_empty());
        assert!(index.top_k(&[1.0], 6).is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut index = VectorIndex::new();
        index.push(unit_chunk("first", 2, 0));
        index.push(unit_chunk("second", 2, 0));
        let results = index.top_k(&[1.0, 0.0], 2);
        assert_eq!(results[0].chunk.id, "first");
        assert_eq!(results[1].chunk.id, "second");
    }

    #[test]
    fn top_k_returns_at_most_k_sorted_descending() {
        let mut index = VectorIndex::new();
        for i in 0..3 {
            index.push(unit_chunk(&format!("c{i}"), 3, i));
        }
        let results = index.top_k(&[1.0, 0.5, 0.1], 2);
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }
}
