//! # Reindexing — Recompute Every Embedding From Stored Text
//!
//! Recomputes every chunk's embedding from its stored text, in the same
//! fixed-size batches `embed::EmbedderHandle::embed_batch` already uses for
//! ingestion, and reports progress through the same `LoadProgress` shape
//! `generate::Generator::load` uses for model downloads — one progress
//! vocabulary for every long-running background operation in this crate.
//!
//! Used after an import (which stores chunks with no embedding yet) and on
//! explicit operator request via `POST /reindex`.

use parking_lot::RwLock;

use crate::embed::EmbedderHandle;
use crate::error::AppError;
use crate::generate::LoadProgress;
use crate::index::VectorIndex;
use crate::model::Chunk;
use crate::store::Store;

const REINDEX_BATCH_SIZE: usize = 8;

/// Re-embeds every stored chunk and rebuilds the in-memory index from
/// scratch. A no-op on an empty corpus (reports 100% immediately). Used
/// after an import (which stores chunks with no embedding) and on explicit
/// operator request.
pub async fn reindex_all(
    store: &Store,
    index: &RwLock<VectorIndex>,
    embedder: &EmbedderHandle,
    on_progress: &(dyn Fn(LoadProgress) + Sync),
) -> Result<(), AppError> {
    let mut chunks = store.get_all_chunks()?;
    let total = chunks.len();
    if total == 0 {
        on_progress(LoadProgress {
            progress: 1.0,
            text: "nothing to reindex".into(),
        });
        index.write().clear();
        return Ok(());
    }

    let mut done = 0usize;
    for batch in chunks.chunks_mut(REINDEX_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        for (chunk, embedding) in batch.iter_mut().zip(embeddings.into_iter()) {
            chunk.embedding = Some(embedding);
        }
        done += batch.len();
        on_progress(LoadProgress {
            progress: 0.05 + 0.95 * (done as f32 / total as f32),
            text: format!("re-embedded {done}/{total} chunks"),
        });
    }

    store.put_many_chunks(&chunks)?;
    *index.write() = VectorIndex::from_chunks(chunks);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EmbeddingModel;
    use anyhow::Result as AnyResult;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct StubEmbedder;
    impl EmbeddingModel for StubEmbedder {
        fn dim(&self) -> usize {
            2
        }
        fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn reindex_empty_corpus_is_noop_and_reports_complete() {
        let store = Store::temporary().unwrap();
        let index = RwLock::new(VectorIndex::new());
        let embedder = EmbedderHandle::with_model(Arc::new(StubEmbedder));
        let progresses = Arc::new(Mutex::new(Vec::new()));
        let p2 = progresses.clone();

        reindex_all(&store, &index, &embedder, &move |p| p2.lock().unwrap().push(p)).await.unwrap();

        let recorded = progresses.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!((recorded[0].progress - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn reindex_assigns_embeddings_and_rebuilds_index() {
        let store = Store::temporary().unwrap();
        let doc_id = Uuid::new_v4();
        let chunk = Chunk {
            id: Chunk::make_id(doc_id, 1, 0),
            doc_id,
            doc_name: "a.txt".into(),
            page: 1,
            text: "x".repeat(40),
            embedding: None,
        };
        store
            .put_many(
                &[crate::model::Document {
                    id: doc_id,
                    name: "a.txt".into(),
                    mime_type: "text/plain".into(),
                    size_bytes: 40,
                    added_at: Utc::now(),
                }],
                &[chunk],
            )
            .unwrap();

        let index = RwLock::new(VectorIndex::new());
        let embedder = EmbedderHandle::with_model(Arc::new(StubEmbedder));

        reindex_all(&store, &index, &embedder, &|_| {}).await.unwrap();

        assert_eq!(index.read().len(), 1);
        let stored = store.get_all_chunks().unwrap();
        assert!(stored[0].is_embedded());
    }
}
