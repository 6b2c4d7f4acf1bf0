//! # Ingestion Pipeline — File Bytes to Searchable Chunks
//!
//! ```text
//! IngestFile (bytes)
//!   ├── 1. extract::extract        → pages of raw text
//!   ├── 2. text::normalize + chunk → overlapping fixed-size windows
//!   ├── 3. embedder.embed_batch    → one vector per chunk
//!   ├── 4. store.put_many          → durable commit (docs + chunks)
//!   └── 5. index.write().push      → in-memory mirror updated
//! ```
//!
//! Progress events (`Event::IngestStarted`/`IngestProgress`/`IngestError`)
//! fire at each stage boundary, the same vocabulary the teacher's
//! `pdf::ingest_pdf` uses for its own SSE progress during
//! download/parse/chunk — generalized here from "PDF only" to any mime type
//! `extract::extract` accepts, and from the teacher's single-document call
//! to a per-file-isolated batch entry point ([`ingest_files`]).

use uuid::Uuid;

use chrono::Utc;
use parking_lot::RwLock;

use crate::config::Config;
use crate::embed::EmbedderHandle;
use crate::error::AppError;
use crate::events::{Event, EventBus};
use crate::extract;
use crate::index::VectorIndex;
use crate::model::{Chunk, Document};
use crate::store::Store;
use crate::text;

pub struct IngestReport {
    pub doc_id: Uuid,
    pub chunk_count: usize,
}

/// One file to ingest: display name, MIME type, raw bytes.
pub struct IngestFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Ingests a single file, per SPEC_FULL.md §4.7 steps 1-7. Returns as soon
/// as the document and its chunks are durably committed and mirrored into
/// `index`.
pub async fn ingest_file(
    store: &Store,
    index: &RwLock<VectorIndex>,
    embedder: &EmbedderHandle,
    events: &EventBus,
    config: &Config,
    file: IngestFile,
) -> Result<IngestReport, AppError> {
    events.publish(Event::IngestStarted {
        file: file.name.clone(),
    });

    embedder.ensure().await?;

    let doc_id = Uuid::new_v4();
    let document = Document {
        id: doc_id,
        name: file.name.clone(),
        mime_type: file.mime_type.clone(),
        size_bytes: file.bytes.len() as u64,
        added_at: Utc::now(),
    };

    let extracted = tokio::task::spawn_blocking({
        let bytes = file.bytes;
        let mime = file.mime_type.clone();
        move || extract::extract(&bytes, &mime)
    })
    .await
    .map_err(|e| AppError::Extract(format!("extraction task panicked: {e}")))??;

    let mut chunks = Vec::new();
    for (page_idx, page_text) in extracted.pages.iter().enumerate() {
        let page = page_idx as u32 + 1;
        for (ordinal, window) in text::chunk(page_text, config.chunk_size, config.chunk_overlap)
            .into_iter()
            .enumerate()
        {
            chunks.push(Chunk {
                id: Chunk::make_id(doc_id, page, ordinal),
                doc_id,
                doc_name: document.name.clone(),
                page,
                text: window,
                embedding: None,
            });
        }
    }

    let total = chunks.len();
    let mut processed = 0usize;
    for batch in chunks.chunks_mut(config.embed_batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        for (chunk, embedding) in batch.iter_mut().zip(embeddings.into_iter()) {
            chunk.embedding = Some(embedding);
        }
        processed += batch.len();
        if total > 0 {
            events.publish(Event::IngestProgress {
                file: file.name.clone(),
                fraction: processed as f32 / total as f32,
            });
        }
    }

    store.put_many(std::slice::from_ref(&document), &chunks)?;

    {
        let mut guard = index.write();
        for chunk in &chunks {
            guard.push(chunk.clone());
        }
    }

    events.publish(Event::DocsChanged {
        doc_count: store.get_all_docs()?.len(),
        chunk_count: index.read().len(),
    });

    Ok(IngestReport {
        doc_id,
        chunk_count: chunks.len(),
    })
}

/// Ingests each file in turn; a failing file publishes `Event::IngestError`
/// and is skipped rather than aborting the remaining files (spec.md §4.7 /
/// §7: per-file isolation).
pub async fn ingest_files(
    store: &Store,
    index: &RwLock<VectorIndex>,
    embedder: &EmbedderHandle,
    events: &EventBus,
    config: &Config,
    files: Vec<IngestFile>,
) -> Vec<Result<IngestReport, AppError>> {
    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let name = file.name.clone();
        let result = ingest_file(store, index, embedder, events, config, file).await;
        if let Err(ref e) = result {
            events.publish(Event::IngestError {
                file: name,
                message: e.to_string(),
            });
        }
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EmbeddingModel;
    use anyhow::Result as AnyResult;
    use std::sync::Arc;

    struct StubEmbedder;
    impl EmbeddingModel for StubEmbedder {
        fn dim(&self) -> usize {
            2
        }
        fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn test_config() -> Config {
        let mut c = Config::default();
        c.chunk_size = 50;
        c.chunk_overlap = 10;
        c.embed_batch_size = 2;
        c
    }

    #[tokio::test]
    async fn ingest_plain_text_produces_chunks_and_commits() {
        let store = Store::temporary().unwrap();
        let index = RwLock::new(VectorIndex::new());
        let embedder = EmbedderHandle::with_model(Arc::new(StubEmbedder));
        let events = EventBus::default();
        let config = test_config();

        let text = "word ".repeat(100);
        let file = IngestFile {
            name: "doc.txt".into(),
            mime_type: "text/plain".into(),
            bytes: text.into_bytes(),
        };

        let report = ingest_file(&store, &index, &embedder, &events, &config, file)
            .await
            .unwrap();

        assert!(report.chunk_count > 0);
        assert_eq!(index.read().len(), report.chunk_count);
        assert_eq!(store.get_all_docs().unwrap().len(), 1);
        assert_eq!(store.get_all_chunks().unwrap().len(), report.chunk_count);
    }

    #[tokio::test]
    async fn ingest_files_isolates_a_failing_file() {
        let store = Store::temporary().unwrap();
        let index = RwLock::new(VectorIndex::new());
        let embedder = EmbedderHandle::with_model(Arc::new(StubEmbedder));
        let events = EventBus::default();
        let config = test_config();

        let good = IngestFile {
            name: "good.txt".into(),
            mime_type: "text/plain".into(),
            bytes: "word ".repeat(100).into_bytes(),
        };
        let bad = IngestFile {
            name: "bad.txt".into(),
            mime_type: "text/plain".into(),
            bytes: vec![0xff, 0xfe],
        };

        let results = ingest_files(&store, &index, &embedder, &events, &config, vec![bad, good])
            .await;
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
        assert_eq!(store.get_all_docs().unwrap().len(), 1);
    }
}
