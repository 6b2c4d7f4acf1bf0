//! # Embedder — Text to Unit-Norm Vector
//!
//! Turns a batch of chunk strings into L2-normalized embedding vectors, the
//! same representation both ingestion (to populate [`crate::index::VectorIndex`])
//! and question-answering (to rank it) need.
//!
//! ## Forward pass
//!
//! ```text
//! texts ── tokenizer ──▶ input_ids, attention_mask
//!       ── BertModel::forward ──▶ per-token hidden states
//!       ── mean-pool over non-pad tokens ──▶ one vector per text
//!       ── L2-normalize ──▶ unit-norm embedding
//! ```
//!
//! This is the teacher's `nlu::embedder::Embedder` almost verbatim (same
//! `candle_transformers::models::bert` API, same fallback ladder for
//! tokenizer/weights). Two things change: the model id (the teacher's
//! BERTimbau is Portuguese-only; spec.md requires a multilingual encoder, so
//! this loads `paraphrase-multilingual-MiniLM-L12-v2`), and the lazy holder
//! is generalized from the teacher's bare `OnceLock` into the four-state
//! machine (`Unloaded | Loading | Ready | Failed`) spec.md §9 calls for, so a
//! failed load can be retried on the next call.

use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert;
use hf_hub::api::sync::Api;
use tokio::sync::Mutex;
use tokenizers::Tokenizer;

use crate::device;
use crate::error::AppError;

/// Narrow interface the QA/ingestion pipelines depend on, so tests can swap
/// in a stub instead of downloading real model weights — the teacher's own
/// test suite sidesteps this entirely by having almost no tests around its
/// model-dependent code; this crate introduces the seam instead.
pub trait EmbeddingModel: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>>;
}

pub struct Embedder {
    model: bert::BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
}

impl Embedder {
    /// Loads the multilingual sentence-embedding model from the HuggingFace
    /// Hub (cached under `~/.cache/huggingface/` after the first run).
    /// GPU is preferred, CPU is the always-succeeding fallback.
    pub fn load(model_id: &str) -> AnyResult<Self> {
        let (device, backend) = device::probe();
        tracing::info!(backend = backend.label(), "Embedder device selected");

        let api = Api::new().context("failed to create HF Hub API")?;
        let repo = api.model(model_id.to_string());

        let config_path = repo.get("config.json").context("failed to download config.json")?;

        let tokenizer = match repo.get("tokenizer.json") {
            Ok(path) => Tokenizer::from_file(&path).map_err(|e| anyhow::anyhow!("{e}"))?,
            Err(_) => {
                let vocab_path = repo
                    .get("vocab.txt")
                    .context("failed to download vocab.txt")?;
                Self::build_bert_tokenizer(
                    vocab_path.to_str().context("invalid vocab.txt path encoding")?,
                )?
            }
        };

        let config_str = std::fs::read_to_string(&config_path)?;
        let config: bert::Config =
            serde_json::from_str(&config_str).context("failed to parse model config")?;
        let dim = config.hidden_size;

        let vb = match repo.get("model.safetensors") {
            Ok(path) => unsafe {
                VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device)
                    .context("failed to load safetensors weights")?
            },
            Err(_) => {
                let weights_path = repo
                    .get("pytorch_model.bin")
                    .context("failed to download pytorch_model.bin")?;
                VarBuilder::from_pth(&weights_path, DType::F32, &device)
                    .context("failed to load pytorch weights")?
            }
        };

        let model = bert::BertModel::load(vb, &config).context("failed to load embedding model")?;
        tracing::info!(model_id, dim, "embedder loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            dim,
        })
    }

    fn build_bert_tokenizer(vocab_path: &str) -> AnyResult<Tokenizer> {
        use tokenizers::models::wordpiece::WordPiece;
        use tokenizers::normalizers::BertNormalizer;
        use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
        use tokenizers::processors::bert::BertProcessing;

        let wordpiece = WordPiece::from_file(vocab_path)
            .unk_token("[UNK]".to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let mut tokenizer = Tokenizer::new(wordpiece);
        tokenizer.with_normalizer(Some(BertNormalizer::new(true, true, None, true)));
        tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
        tokenizer.with_post_processor(Some(BertProcessing::new(
            ("[SEP]".to_string(), 102),
            ("[CLS]".to_string(), 101),
        )));
        Ok(tokenizer)
    }

    fn mean_pool_normalize(&self, output: &Tensor, attention_mask: &Tensor) -> AnyResult<Tensor> {
        let mask_expanded = attention_mask
            .unsqueeze(2)?
            .to_dtype(DType::F32)?
            .broadcast_as(output.shape())?;
        let masked = (output * mask_expanded.clone())?;
        let summed = masked.sum(1)?;
        let mask_sum = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = (summed / mask_sum)?;
        let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        Ok(pooled.broadcast_div(&norm)?)
    }
}

impl EmbeddingModel for Embedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings: Vec<_> = texts
            .iter()
            .map(|t| {
                self.tokenizer
                    .encode(t.as_str(), true)
                    .map_err(|e| anyhow::anyhow!("tokenizer error: {e}"))
            })
            .collect::<AnyResult<Vec<_>>>()?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch_size = encodings.len();
        let mut all_ids = vec![0u32; batch_size * max_len];
        let all_type_ids = vec![0u32; batch_size * max_len];
        let mut all_mask = vec![0u32; batch_size * max_len];

        for (i, enc) in encodings.iter().enumerate() {
            let ids = enc.get_ids();
            let mask = enc.get_attention_mask();
            let offset = i * max_len;
            for (j, &id) in ids.iter().enumerate() {
                all_ids[offset + j] = id;
                all_mask[offset + j] = mask[j];
            }
        }

        let input_ids = Tensor::from_vec(all_ids, (batch_size, max_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(all_type_ids, (batch_size, max_len), &self.device)?;
        let attention_mask = Tensor::from_vec(all_mask, (batch_size, max_len), &self.device)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let normalized = self.mean_pool_normalize(&output, &attention_mask)?;

        let mut results = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            results.push(normalized.get(i)?.to_vec1()?);
        }
        Ok(results)
    }
}

enum State {
    Unloaded,
    Loading,
    Ready(Arc<dyn EmbeddingModel>),
    Failed(String),
}

/// Lazy singleton holder. `ensure()` transitions Unloaded→Loading→Ready and
/// deduplicates concurrent loads via the guarding mutex; a failed load
/// leaves the handle `Unloaded` again so the next call retries.
pub struct EmbedderHandle {
    state: Mutex<State>,
    model_id: String,
}

impl EmbedderHandle {
    pub fn new(model_id: String) -> Self {
        Self {
            state: Mutex::new(State::Unloaded),
            model_id,
        }
    }

    #[cfg(test)]
    pub fn with_model(model: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            state: Mutex::new(State::Ready(model)),
            model_id: String::new(),
        }
    }

    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.lock().await, State::Ready(_))
    }

    /// Ensures the embedder is loaded, loading it on first call. At most one
    /// load is in flight at a time because the whole operation runs under
    /// the state mutex (spec.md §4.4: "callers serialize batches").
    pub async fn ensure(&self) -> Result<Arc<dyn EmbeddingModel>, AppError> {
        let mut guard = self.state.lock().await;
        if let State::Ready(model) = &*guard {
            return Ok(model.clone());
        }
        *guard = State::Loading;
        let model_id = self.model_id.clone();
        let loaded = tokio::task::spawn_blocking(move || Embedder::load(&model_id))
            .await
            .map_err(|e| AppError::Embed(format!("embedder load task panicked: {e}")));
        match loaded {
            Ok(Ok(embedder)) => {
                let arc: Arc<dyn EmbeddingModel> = Arc::new(embedder);
                *guard = State::Ready(arc.clone());
                Ok(arc)
            }
            Ok(Err(e)) => {
                *guard = State::Failed(e.to_string());
                Err(AppError::Embed(e.to_string()))
            }
            Err(e) => {
                *guard = State::Unloaded;
                Err(e)
            }
        }
    }

    /// Embeds a batch of texts, loading the model first if needed.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let model = self.ensure().await?;
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed_batch(&texts))
            .await
            .map_err(|e| AppError::Embed(format!("embed task panicked: {e}")))?
            .map_err(|e| AppError::Embed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEmbedder {
        dim: usize,
    }

    impl EmbeddingModel for StubEmbedder {
        fn dim(&self) -> usize {
            self.dim
        }
        fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dim];
                    v[t.len() % self.dim] = 1.0;
                    v
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn handle_reports_ready_once_preloaded() {
        let handle = EmbedderHandle::with_model(Arc::new(StubEmbedder { dim: 4 }));
        assert!(handle.is_ready().await);
        let out = handle
            .embed_batch(&["hello".to_string(), "hi".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 4);
    }

    #[tokio::test]
    async fn embed_batch_preserves_order_and_empty_input() {
        let handle = EmbedderHandle::with_model(Arc::new(StubEmbedder { dim: 4 }));
        let out = handle.embed_batch(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
