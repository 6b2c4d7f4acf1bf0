//! # HTTP Handlers — One Per Command/Projection SPEC_FULL.md §6 Names
//!
//! Generalizes the teacher's handler module (Maud/HTMX fragments over a
//! hand-built knowledge graph) into a JSON+SSE surface over the RAG
//! pipelines; the SSE idiom itself (subscribe to the broadcast bus, wrap in
//! `BroadcastStream`, `keep_alive` every 15s) is kept verbatim from the
//! teacher's `sse_events` handler.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use super::state::AppState;
use crate::error::AppError;
use crate::events::Event;
use crate::ingest::{ingest_files, IngestFile};
use crate::metrics::{self, ProcessMetrics};
use crate::qa;
use crate::reindex::reindex_all;
use crate::store;

/// Maps a pipeline error to a status code and a JSON body — never a bare
/// 500 with no explanation (spec.md §7).
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NoCorpus => StatusCode::CONFLICT,
            AppError::GeneratorNotReady => StatusCode::CONFLICT,
            AppError::GeneratorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ImportFormatError(_) => StatusCode::BAD_REQUEST,
            AppError::Extract(_) => StatusCode::BAD_REQUEST,
            AppError::Embed(_) | AppError::Generate(_) | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }))
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

/// Returned when another ingest/ask/reindex/import is already in flight —
/// the pipelines themselves only document "not supported" (spec.md §5);
/// this is where it's enforced.
fn busy_response() -> Response {
    (
        StatusCode::CONFLICT,
        Json(ErrorBody {
            kind: "Busy",
            message: "another operation is already in progress".into(),
        }),
    )
        .into_response()
}

// ─── GET /status ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct DocSummary {
    pub id: uuid::Uuid,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub docs: Vec<DocSummary>,
    pub chunk_count: usize,
    pub embedder_ready: bool,
    pub generator_ready: bool,
    pub backend: &'static str,
    pub metrics: ProcessMetrics,
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let docs = state
        .store
        .get_all_docs()?
        .into_iter()
        .map(|d| DocSummary {
            id: d.id,
            name: d.name,
            mime_type: d.mime_type,
            size_bytes: d.size_bytes,
        })
        .collect();
    Ok(Json(StatusResponse {
        docs,
        chunk_count: state.index.read().len(),
        embedder_ready: state.embedder.is_ready().await,
        generator_ready: state.generator.is_ready().await,
        backend: state.backend.label(),
        metrics: metrics::collect_metrics(state.backend),
    }))
}

// ─── POST /documents ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct IngestOutcome {
    pub file: String,
    pub ok: bool,
    pub chunk_count: Option<usize>,
    pub error: Option<String>,
}

pub async fn add_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let Ok(_guard) = state.busy.try_lock() else {
        return busy_response();
    };

    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                return AppError::Extract(format!("malformed multipart upload: {e}"))
                    .into_response()
            }
        };
        let name = field.file_name().unwrap_or("document").to_string();
        let mime_type = field.content_type().unwrap_or("").to_string();
        let bytes = match field.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                return AppError::Extract(format!("failed to read upload body: {e}"))
                    .into_response()
            }
        };
        files.push(IngestFile {
            name,
            mime_type,
            bytes,
        });
    }

    let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    let results = ingest_files(
        &state.store,
        &state.index,
        &state.embedder,
        &state.events,
        &state.config,
        files,
    )
    .await;

    let outcomes: Vec<IngestOutcome> = names
        .into_iter()
        .zip(results)
        .map(|(name, r)| match r {
            Ok(report) => IngestOutcome {
                file: name,
                ok: true,
                chunk_count: Some(report.chunk_count),
                error: None,
            },
            Err(e) => IngestOutcome {
                file: name,
                ok: false,
                chunk_count: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Json(outcomes).into_response()
}

// ─── POST /embedder/load, POST /generator/load ────────────────────────────

pub async fn load_embedder(State(state): State<AppState>) -> Response {
    match state.embedder.ensure().await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize, Default)]
pub struct LoadGeneratorRequest {
    pub model_id: Option<String>,
}

pub async fn load_generator(State(state): State<AppState>, body: String) -> Response {
    let model_id = serde_json::from_str::<LoadGeneratorRequest>(&body)
        .ok()
        .and_then(|b| b.model_id)
        .unwrap_or_else(|| state.config.generator_model_id.clone());

    let events = state.events.clone();
    let result = state
        .generator
        .load(model_id, move |progress| {
            events.publish(Event::GeneratorProgress {
                progress: progress.progress,
                text: progress.text,
            });
        })
        .await;

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

// ─── POST /ask (SSE) ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub show_context: bool,
}

pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Response {
    // `try_lock()` only proves no other operation holds the lock at the
    // instant of the call; the guard must stay held for the whole streamed
    // answer, not just this handler's synchronous return, or a second
    // request could slip in while generation is still in flight (spec.md
    // §5: only one task actor drives a user-initiated operation at a time).
    // It's moved into the forwarding task below, which outlives this fn and
    // drops it once the stream actually finishes.
    let Ok(guard) = state.busy.clone().try_lock_owned() else {
        return busy_response();
    };

    let mut bus_rx = state.events.subscribe();
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(64);

    let ask_state = state.clone();
    let question = req.question;
    let ask_task = tokio::spawn(async move {
        qa::ask(
            &ask_state.index,
            &ask_state.embedder,
            &ask_state.generator,
            &ask_state.events,
            &question,
            req.strict,
            req.show_context,
            ask_state.config.top_k,
        )
        .await
    });

    tokio::spawn(async move {
        let _guard = guard;
        tokio::pin!(ask_task);
        loop {
            tokio::select! {
                biased;
                event = bus_rx.recv() => {
                    match event {
                        Ok(event) => { if tx.send(event).await.is_err() { return; } }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
                result = &mut ask_task => {
                    let terminal = match result {
                        Ok(Ok(report)) => Event::AskCompleted {
                            message_id: report.message_id,
                            citations: report.citations.into_iter().collect(),
                        },
                        Ok(Err(e)) => Event::AskFailed { message: e.to_string() },
                        Err(e) => Event::AskFailed {
                            message: format!("ask task panicked: {e}"),
                        },
                    };
                    let _ = tx.send(terminal).await;
                    return;
                }
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().data(data))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
        .into_response()
}

// ─── POST /reset ───────────────────────────────────────────────────────────

pub async fn reset(State(state): State<AppState>) -> Response {
    let Ok(_guard) = state.busy.try_lock() else {
        return busy_response();
    };
    match state.store.clear_all() {
        Ok(()) => {
            state.index.write().clear();
            state.events.publish(Event::DocsChanged {
                doc_count: 0,
                chunk_count: 0,
            });
            StatusCode::OK.into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ─── GET /export, POST /import ─────────────────────────────────────────────

pub async fn export(State(state): State<AppState>) -> Result<Json<store::ExportPayload>, AppError> {
    Ok(Json(store::export(&state.store)?))
}

pub async fn import(State(state): State<AppState>, body: String) -> Response {
    let Ok(_guard) = state.busy.try_lock() else {
        return busy_response();
    };

    let payload = match store::parse_import(&body) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let (_, _chunks) = match store::import(&state.store, &payload) {
        Ok(pair) => pair,
        Err(e) => return e.into_response(),
    };

    let events = state.events.clone();
    let result = reindex_all(&state.store, &state.index, &state.embedder, &move |p| {
        events.publish(Event::EmbedderProgress {
            progress: p.progress,
            text: p.text,
        });
    })
    .await;

    match result {
        Ok(()) => {
            state.events.publish(Event::DocsChanged {
                doc_count: state.store.get_all_docs().map(|d| d.len()).unwrap_or(0),
                chunk_count: state.index.read().len(),
            });
            StatusCode::OK.into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ─── POST /reindex ──────────────────────────────────────────────────────────

pub async fn reindex(State(state): State<AppState>) -> Response {
    let Ok(_guard) = state.busy.try_lock() else {
        return busy_response();
    };

    let events = state.events.clone();
    let result = reindex_all(&state.store, &state.index, &state.embedder, &move |p| {
        events.publish(Event::EmbedderProgress {
            progress: p.progress,
            text: p.text,
        });
    })
    .await;

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}
