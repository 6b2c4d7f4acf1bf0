//! # localrag — Local Retrieval-Augmented Question Answering
//!
//! Ingests PDF/text documents, chunks and embeds them with a local
//! multilingual encoder, persists chunks and vectors locally, retrieves by
//! cosine similarity, and grounds a locally-hosted generative model's
//! streamed answer in the retrieved context. No document or question ever
//! leaves the machine.

pub mod chat;
pub mod config;
pub mod device;
pub mod embed;
pub mod error;
pub mod events;
pub mod extract;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod qa;
pub mod reindex;
pub mod store;
pub mod text;
pub mod web;
