//! # Web Router — The Thin HTTP View Over the RAG Pipelines
//!
//! | Route | Method | Handler |
//! |-------|--------|---------|
//! | `/status` | GET | [`handlers::status`] |
//! | `/documents` | POST | [`handlers::add_documents`] |
//! | `/embedder/load` | POST | [`handlers::load_embedder`] |
//! | `/generator/load` | POST | [`handlers::load_generator`] |
//! | `/ask` | POST (SSE) | [`handlers::ask`] |
//! | `/reset` | POST | [`handlers::reset`] |
//! | `/export` | GET | [`handlers::export`] |
//! | `/import` | POST | [`handlers::import`] |
//! | `/reindex` | POST | [`handlers::reindex`] |
//!
//! Generalizes the teacher's `create_router` (HTML pages + HTMX fragments +
//! an `/assets` static mount) into the JSON/SSE command surface SPEC_FULL.md
//! §6 names. This view is a convenience harness over the library, not the
//! deliverable (SPEC_FULL.md §1).

pub mod handlers;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use state::AppState;

/// The view shell (spec.md §1: out of scope, consumed only through this
/// surface) is expected to run as a separately-served page — a local dev
/// server on another port, or a packaged app shell — so the API allows any
/// origin, the same permissive stance the pack's own local-first API
/// servers take (e.g. `cool-japan-legalis`'s `legalis-api`).
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route(
            "/documents",
            post(handlers::add_documents).layer(DefaultBodyLimit::max(50 * 1024 * 1024)),
        )
        .route("/embedder/load", post(handlers::load_embedder))
        .route("/generator/load", post(handlers::load_generator))
        .route("/ask", post(handlers::ask))
        .route("/reset", post(handlers::reset))
        .route("/export", get(handlers::export))
        .route("/import", post(handlers::import))
        .route("/reindex", post(handlers::reindex))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
