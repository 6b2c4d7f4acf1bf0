//! # Entry Point
//!
//! ## Two-phase startup
//!
//! ```text
//! Phase 1 (immediate):          Phase 2 (on demand):
//! ┌─────────────────────┐       ┌───────────────────────┐
//! │ open store           │      │ POST /embedder/load    │
//! │ rebuild index         │      │ POST /generator/load   │
//! │ bind + serve          │ ───▶ │ or first ingest/ask    │
//! └─────────────────────┘       │ (lazy-loads embedder)  │
//!                                └───────────────────────┘
//! ```
//!
//! Same shape as the teacher's `main.rs`: the axum server binds and starts
//! accepting connections immediately; the embedder and generator remain
//! `Unloaded` until a caller explicitly requests them or ingestion/QA
//! triggers the embedder's lazy load — there is no upfront background model
//! download blocking readiness.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use localrag::config::Config;
use localrag::device;
use localrag::embed::EmbedderHandle;
use localrag::events::EventBus;
use localrag::generate::GeneratorHandle;
use localrag::index::VectorIndex;
use localrag::store::Store;
use localrag::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(bind_addr = %config.bind_addr, store_path = %config.store_path, "starting");

    let (_device, backend) = device::probe();
    tracing::info!(backend = backend.label(), "device probe complete");

    let store = Arc::new(Store::open(&config.store_path)?);
    let chunks = store.get_all_chunks()?;
    tracing::info!(
        doc_count = store.get_all_docs()?.len(),
        chunk_count = chunks.len(),
        "store opened"
    );
    let index = Arc::new(RwLock::new(VectorIndex::from_chunks(chunks)));

    let embedder = Arc::new(EmbedderHandle::new(config.embedder_model_id.clone()));
    let generator = Arc::new(GeneratorHandle::new());
    let events = Arc::new(EventBus::default());

    let state = AppState {
        store,
        index,
        embedder,
        generator,
        events,
        config: Arc::new(config.clone()),
        backend,
        busy: Arc::new(Mutex::new(())),
    };

    let app = web::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
