//! # Core Data Model — `Document` and `Chunk`, per SPEC_FULL.md §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: Uuid,
    pub doc_name: String,
    pub page: u32,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn make_id(doc_id: Uuid, page: u32, ordinal: usize) -> String {
        format!("{doc_id}|p{page}|c{ordinal}")
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Minimum non-whitespace length a chunk must have to survive chunking.
pub const MIN_CHUNK_CHARS: usize = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_composite_and_deterministic() {
        let doc_id = Uuid::nil();
        let id1 = Chunk::make_id(doc_id, 2, 3);
        let id2 = Chunk::make_id(doc_id, 2, 3);
        assert_eq!(id1, id2);
        assert_eq!(id1, format!("{doc_id}|p2|c3"));
    }
}
