//! # Event Bus — One Broadcast Channel, Every Observable Projection
//!
//! Generalizes the teacher's `web::events::IngestionEvent` (a
//! `broadcast::Sender<IngestionEvent>` scoped to PDF ingestion only) into one
//! channel carrying every observable projection spec.md §6 names: ingest
//! progress, embedder/generator load progress, and QA transcript deltas. One
//! bus, one `#[serde(tag = "type")]` enum, same shape the teacher already
//! uses for its SSE view.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "ingest.started")]
    IngestStarted { file: String },
    #[serde(rename = "ingest.progress")]
    IngestProgress { file: String, fraction: f32 },
    #[serde(rename = "ingest.error")]
    IngestError { file: String, message: String },
    #[serde(rename = "docs.changed")]
    DocsChanged { doc_count: usize, chunk_count: usize },

    #[serde(rename = "embedder.progress")]
    EmbedderProgress { progress: f32, text: String },
    #[serde(rename = "generator.progress")]
    GeneratorProgress { progress: f32, text: String },

    #[serde(rename = "message.appended")]
    MessageAppended {
        message_id: Uuid,
        role: &'static str,
        content: String,
    },
    #[serde(rename = "message.deltaAppended")]
    MessageDeltaAppended { message_id: Uuid, delta: String },
    #[serde(rename = "message.metaReplaced")]
    MessageMetaReplaced { message_id: Uuid, warning: String },

    #[serde(rename = "ask.completed")]
    AskCompleted {
        message_id: Uuid,
        citations: Vec<u32>,
    },
    #[serde(rename = "ask.failed")]
    AskFailed { message: String },
}

/// Publisher handle. Cloneable; every component that emits events holds one.
/// A lagging or absent subscriber never blocks a publisher — `broadcast`
/// drops the oldest buffered event instead, matching the teacher's own
/// `events_tx` usage in `web::state::AppState`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishes an event. Ignores the "no subscribers" error — observers
    /// are optional (spec.md §6: these are projections, not inputs).
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(Event::DocsChanged {
            doc_count: 0,
            chunk_count: 0,
        });
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::IngestStarted {
            file: "a.pdf".into(),
        });
        let event = rx.recv().await.unwrap();
        matches!(event, Event::IngestStarted { .. });
    }
}
