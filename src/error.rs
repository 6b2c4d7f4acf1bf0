//! # Error Kinds Shared Across the Pipeline
//!
//! Leaf modules (extract, embed, generate, store) use `anyhow::Result`
//! internally, the same way the teacher's `nlu::embedder` and `pdf` modules
//! do, and convert into one of these variants at the component boundary so
//! callers can match on kind per the propagation policy in SPEC_FULL.md §7.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("extract error: {0}")]
    Extract(String),

    #[error("embed error: {0}")]
    Embed(String),

    #[error("generator unavailable: {0}")]
    GeneratorUnavailable(String),

    #[error("generator not ready")]
    GeneratorNotReady,

    #[error("generate error: {0}")]
    Generate(String),

    #[error("no corpus: at least one embedded chunk is required")]
    NoCorpus,

    #[error("import format error: {0}")]
    ImportFormatError(String),
}

impl AppError {
    /// Short, stable kind name — used by the web view to pick a status code
    /// without pattern-matching the whole enum at the handler boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Storage(_) => "StorageError",
            AppError::Extract(_) => "ExtractError",
            AppError::Embed(_) => "EmbedError",
            AppError::GeneratorUnavailable(_) => "GeneratorUnavailable",
            AppError::GeneratorNotReady => "GeneratorNotReady",
            AppError::Generate(_) => "GenerateError",
            AppError::NoCorpus => "NoCorpus",
            AppError::ImportFormatError(_) => "ImportFormatError",
        }
    }
}

impl From<sled::Error> for AppError {
    fn from(e: sled::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
