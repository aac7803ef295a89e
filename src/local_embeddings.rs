//! Local embedding generation using a multilingual sentence-transformers
//! model via candle.
//!
//! Produces L2-normalized mean-pooled embeddings. Weights are fetched from
//! Hugging Face Hub on first load and cached by `hf-hub`.

use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, HiddenAct, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::embeddings::Embedder;
use crate::error::EmbedError;
use crate::settings::EmbeddingSettings;

/// Model, tokenizer and device; not shared across threads without the mutex
struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Local embedding model wrapper.
///
/// Inference runs on the blocking pool and is serialized per instance.
pub struct LocalEmbedder {
    encoder: Arc<Mutex<BertEncoder>>,
    model_id: String,
    batch_size: usize,
}

fn select_device() -> Device {
    // Try CUDA if feature enabled, otherwise CPU only
    #[cfg(feature = "cuda")]
    {
        if candle_core::utils::cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(dev) => {
                    info!("Using CUDA device (GPU)");
                    return dev;
                }
                Err(e) => {
                    tracing::warn!("CUDA device creation failed: {}, falling back to CPU", e);
                }
            }
        } else {
            info!("CUDA not available, using CPU");
        }
        Device::Cpu
    }

    #[cfg(not(feature = "cuda"))]
    {
        info!("Using CPU (cuda feature not enabled)");
        Device::Cpu
    }
}

impl LocalEmbedder {
    /// Load model from Hugging Face Hub (downloads on first use). Blocking.
    pub fn load(settings: &EmbeddingSettings) -> Result<Self, EmbedError> {
        let device = select_device();
        let load_err = |what: &str, e: &dyn std::fmt::Display| EmbedError::ModelLoad(format!("{}: {}", what, e));

        let api = Api::new().map_err(|e| load_err("Failed to create HF API", &e))?;
        let repo = api.repo(Repo::with_revision(
            settings.model_id.clone(),
            RepoType::Model,
            settings.revision.clone(),
        ));

        let config_path = repo
            .get("config.json")
            .map_err(|e| load_err("Failed to download config", &e))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| load_err("Failed to download tokenizer", &e))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| load_err("Failed to download weights", &e))?;

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| load_err("Failed to read config", &e))?;
        let mut config: Config =
            serde_json::from_str(&config_str).map_err(|e| load_err("Failed to parse config", &e))?;

        // sentence-transformers BERT checkpoints use exact gelu
        config.hidden_act = HiddenAct::Gelu;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| load_err("Failed to load tokenizer", &e))?;

        let padding = PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        };
        let truncation = TruncationParams {
            max_length: settings.max_input_tokens,
            ..Default::default()
        };
        tokenizer.with_padding(Some(padding));
        tokenizer
            .with_truncation(Some(truncation))
            .map_err(|e| load_err("Failed to set truncation", &e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|e| load_err("Failed to load weights", &e))?
        };

        let model = BertModel::load(vb, &config).map_err(|e| load_err("Failed to build model", &e))?;

        info!("Embedding model loaded: {}", settings.model_id);

        Ok(Self {
            encoder: Arc::new(Mutex::new(BertEncoder {
                model,
                tokenizer,
                device,
            })),
            model_id: settings.model_id.clone(),
            batch_size: settings.batch_size.max(1),
        })
    }
}

impl BertEncoder {
    /// Generate embeddings for a batch of texts
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let infer = |what: &str, e: &dyn std::fmt::Display| EmbedError::Inference(format!("{}: {}", what, e));

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| infer("Tokenization failed", &e))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut all_ids = Vec::with_capacity(batch_size * seq_len);
        let mut all_mask = Vec::with_capacity(batch_size * seq_len);
        let mut all_type_ids = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            all_ids.extend(encoding.get_ids().iter().map(|&x| x as i64));
            all_mask.extend(encoding.get_attention_mask().iter().map(|&x| x as i64));
            all_type_ids.extend(encoding.get_type_ids().iter().map(|&x| x as i64));
        }

        let input_ids = Tensor::from_vec(all_ids, (batch_size, seq_len), &self.device)
            .map_err(|e| infer("Failed to create input_ids tensor", &e))?;
        let attention_mask = Tensor::from_vec(all_mask, (batch_size, seq_len), &self.device)
            .map_err(|e| infer("Failed to create attention_mask tensor", &e))?;
        let token_type_ids = Tensor::from_vec(all_type_ids, (batch_size, seq_len), &self.device)
            .map_err(|e| infer("Failed to create token_type_ids tensor", &e))?;

        let hidden_states = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| infer("Model forward failed", &e))?;

        // Mean pooling with attention mask
        let mask_expanded = attention_mask
            .unsqueeze(2)
            .and_then(|m| m.to_dtype(DTYPE))
            .and_then(|m| m.broadcast_as(hidden_states.shape()))
            .map_err(|e| infer("Mask expansion failed", &e))?;

        let summed = hidden_states
            .mul(&mask_expanded)
            .and_then(|m| m.sum(1))
            .map_err(|e| infer("Masked sum failed", &e))?;

        let mask_sum = mask_expanded
            .sum(1)
            .and_then(|m| m.clamp(1e-9, f64::MAX))
            .map_err(|e| infer("Mask sum failed", &e))?;

        let pooled = summed
            .div(&mask_sum)
            .map_err(|e| infer("Division failed", &e))?;

        // L2 normalize
        let norm = pooled
            .sqr()
            .and_then(|t| t.sum_keepdim(1))
            .and_then(|t| t.sqrt())
            .and_then(|t| t.clamp(1e-12, f64::MAX))
            .map_err(|e| infer("Norm failed", &e))?;

        let normalized = pooled
            .broadcast_div(&norm)
            .map_err(|e| infer("Normalize failed", &e))?;

        normalized
            .to_vec2::<f32>()
            .map_err(|e| infer("To vec failed", &e))
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let encoder = Arc::clone(&self.encoder);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        // Dropping this future (caller timeout) stops the blocking task at
        // the next batch and frees the encoder for queued requests
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancelled));

        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, EmbedError> {
            let encoder = encoder
                .lock()
                .map_err(|_| EmbedError::Inference("embedding model lock poisoned".to_string()))?;
            embed_batches(&texts, batch_size, &cancelled, |batch| encoder.embed_batch(batch))
        })
        .await
        .map_err(|e| EmbedError::Inference(format!("embedding task failed: {}", e)))?
    }
}

/// Raises the flag when dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Run `embed_batch` over `texts` in chunks, checking `cancelled` before each
fn embed_batches<F>(
    texts: &[String],
    batch_size: usize,
    cancelled: &AtomicBool,
    mut embed_batch: F,
) -> Result<Vec<Vec<f32>>, EmbedError>
where
    F: FnMut(&[&str]) -> Result<Vec<Vec<f32>>, EmbedError>,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        if cancelled.load(Ordering::Relaxed) {
            debug!("Embedding abandoned after {} of {} texts", vectors.len(), texts.len());
            return Err(EmbedError::Cancelled);
        }
        let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
        vectors.extend(embed_batch(&refs)?);
    }
    Ok(vectors)
}
