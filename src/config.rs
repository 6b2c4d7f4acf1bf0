//! # Runtime Configuration
//!
//! The teacher keeps a single hardcoded constant (`persistence::KB_PATH`) and
//! an inline bind address in `main.rs`. This crate has an order of magnitude
//! more tunables, so they're gathered into one struct read from environment
//! variables at startup, with defaults matching every constant named in
//! spec.md (1200/200 chunking, K=6, batch=8, temperatures 0.2/0.5).
//!
//! ## Env overlay
//!
//! Every field has a `LOCALRAG_*` override (e.g. `LOCALRAG_CHUNK_SIZE`,
//! `LOCALRAG_EMBED_BATCH_SIZE`, `LOCALRAG_STRICT_TEMPERATURE`); unset or
//! malformed vars fall back to the default rather than failing startup.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub store_path: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub embedder_model_id: String,
    pub generator_model_id: String,
    pub top_k: usize,
    pub strict_temperature: f32,
    pub loose_temperature: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            store_path: "data/store".into(),
            chunk_size: 1200,
            chunk_overlap: 200,
            embed_batch_size: 8,
            embedder_model_id: "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2"
                .into(),
            generator_model_id: "TheBloke/Mistral-7B-Instruct-v0.2-GGUF".into(),
            top_k: 6,
            strict_temperature: 0.2,
            loose_temperature: 0.5,
        }
    }
}

impl Config {
    /// Overlays environment variables onto the defaults. Unset vars keep the
    /// default; malformed numeric vars keep the default rather than failing
    /// startup (no config file format is introduced at this scale).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("LOCALRAG_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = env::var("LOCALRAG_STORE_PATH") {
            cfg.store_path = v;
        }
        if let Ok(v) = env::var("LOCALRAG_CHUNK_SIZE").and_then(|s| Ok(s.parse::<usize>())) {
            if let Ok(n) = v {
                cfg.chunk_size = n;
            }
        }
        if let Ok(v) = env::var("LOCALRAG_CHUNK_OVERLAP").and_then(|s| Ok(s.parse::<usize>())) {
            if let Ok(n) = v {
                cfg.chunk_overlap = n;
            }
        }
        if let Ok(v) = env::var("LOCALRAG_EMBEDDER_MODEL_ID") {
            cfg.embedder_model_id = v;
        }
        if let Ok(v) = env::var("LOCALRAG_GENERATOR_MODEL_ID") {
            cfg.generator_model_id = v;
        }
        if let Ok(v) = env::var("LOCALRAG_TOP_K").and_then(|s| Ok(s.parse::<usize>())) {
            if let Ok(n) = v {
                cfg.top_k = n;
            }
        }
        if let Ok(v) = env::var("LOCALRAG_EMBED_BATCH_SIZE").and_then(|s| Ok(s.parse::<usize>())) {
            if let Ok(n) = v {
                cfg.embed_batch_size = n;
            }
        }
        if let Ok(v) = env::var("LOCALRAG_STRICT_TEMPERATURE").and_then(|s| Ok(s.parse::<f32>())) {
            if let Ok(n) = v {
                cfg.strict_temperature = n;
            }
        }
        if let Ok(v) = env::var("LOCALRAG_LOOSE_TEMPERATURE").and_then(|s| Ok(s.parse::<f32>())) {
            if let Ok(n) = v {
                cfg.loose_temperature = n;
            }
        }
        cfg
    }
}
