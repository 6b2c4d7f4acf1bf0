//! # Shared Application State for the Axum View
//!
//! Generalizes the teacher's `AppState { model: Arc<OnceLock<ModelReady>>,
//! kb: Arc<RwLock<KnowledgeBase>>, events_tx }` from a single background-load
//! slot into the full set of long-lived handles SPEC_FULL.md §5 names: the
//! store, the in-memory vector index mirror, the embedder/generator
//! singletons (each already lazy internally), the event bus, and config.
//! `index` keeps the teacher's own `parking_lot::RwLock` — every access
//! locks, does a synchronous `VectorIndex` read/write, and unlocks without
//! ever holding the guard across an `.await`, so there's no reason to pay
//! for an async-aware lock here.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::device::Backend;
use crate::embed::EmbedderHandle;
use crate::events::EventBus;
use crate::generate::GeneratorHandle;
use crate::index::VectorIndex;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub index: Arc<RwLock<VectorIndex>>,
    pub embedder: Arc<EmbedderHandle>,
    pub generator: Arc<GeneratorHandle>,
    pub events: Arc<EventBus>,
    pub config: Arc<Config>,
    pub backend: Backend,
    /// Guards ingest/ask/reindex/import against concurrent reentry — the
    /// core pipelines themselves just document "not supported" (spec.md
    /// §5); this is where that policy is enforced, as a 409 to the caller.
    pub busy: Arc<Mutex<()>>,
}
