//! Embedding providers
//!
//! The pipeline only sees the [`Embedder`] trait. Two implementations ship:
//! the local multilingual BERT model (see `local_embeddings`) and the OpenAI
//! embeddings endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::EmbedError;
use crate::local_embeddings::LocalEmbedder;
use crate::settings::{EmbeddingBackend, EmbeddingSettings};

/// Turns texts into fixed-length vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for logs and health output
    fn model_name(&self) -> &str;

    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Remote embeddings over the OpenAI `/embeddings` API
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, base_url: Option<String>, batch_size: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = OpenAiEmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Request(format!("API error {}: {}", status, body)));
        }

        let api_response: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Request(format!("Failed to parse embedding response: {}", e)))?;

        order_by_index(api_response.data, texts.len())
    }
}

/// The API may return items out of order; put them back by index
fn order_by_index(data: Vec<OpenAiEmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
    if data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            got: data.len(),
        });
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in data {
        match slots.get_mut(item.index) {
            Some(slot) => *slot = Some(item.embedding),
            None => {
                return Err(EmbedError::Request(format!(
                    "embedding index {} out of range",
                    item.index
                )))
            }
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or(EmbedError::InvalidVector(i)))
        .collect()
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

/// Check a provider's output before it reaches the clustering engine
pub fn validate_vectors(vectors: &[Vec<f32>], expected: usize) -> Result<usize, EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            got: vectors.len(),
        });
    }
    let dim = vectors.first().map(Vec::len).unwrap_or(0);
    for (index, v) in vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(EmbedError::DimensionMismatch {
                index,
                expected: dim,
                found: v.len(),
            });
        }
        if v.is_empty() || v.iter().any(|x| !x.is_finite()) {
            return Err(EmbedError::InvalidVector(index));
        }
    }
    Ok(dim)
}

/// Build the configured embedder. Loading the local model downloads weights
/// on first use and takes a while; do this once at startup.
pub async fn from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>, EmbedError> {
    match settings.backend {
        EmbeddingBackend::Local => {
            let settings = settings.clone();
            let embedder = tokio::task::spawn_blocking(move || LocalEmbedder::load(&settings))
                .await
                .map_err(|e| EmbedError::ModelLoad(format!("loader task failed: {}", e)))??;
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::OpenAi => {
            let api_key = settings
                .openai_api_key()
                .ok_or_else(|| EmbedError::ModelLoad("OPENAI_API_KEY not set".to_string()))?;
            info!("Embedding backend: OpenAI ({})", settings.openai_model);
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                settings.openai_model.clone(),
                settings.openai_base_url.clone(),
                settings.batch_size,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_vectors_ok() {
        let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        assert_eq!(validate_vectors(&vectors, 2).unwrap(), 2);
    }

    #[test]
    fn test_validate_vectors_count_mismatch() {
        let vectors = vec![vec![0.1, 0.2]];
        assert!(matches!(
            validate_vectors(&vectors, 3),
            Err(EmbedError::CountMismatch { expected: 3, got: 1 })
        ));
    }

    #[test]
    fn test_validate_vectors_dimension_and_nan() {
        let ragged = vec![vec![0.1, 0.2], vec![0.3]];
        assert!(matches!(
            validate_vectors(&ragged, 2),
            Err(EmbedError::DimensionMismatch { index: 1, .. })
        ));

        let nan = vec![vec![0.1, f32::NAN]];
        assert!(matches!(validate_vectors(&nan, 1), Err(EmbedError::InvalidVector(0))));

        let empty = vec![vec![]];
        assert!(matches!(validate_vectors(&empty, 1), Err(EmbedError::InvalidVector(0))));
    }

    #[test]
    fn test_order_by_index() {
        let data = vec![
            OpenAiEmbeddingData { index: 1, embedding: vec![2.0] },
            OpenAiEmbeddingData { index: 0, embedding: vec![1.0] },
        ];
        assert_eq!(order_by_index(data, 2).unwrap(), vec![vec![1.0], vec![2.0]]);

        let short = vec![OpenAiEmbeddingData { index: 0, embedding: vec![1.0] }];
        assert!(order_by_index(short, 2).is_err());
    }

    #[test]
    fn test_openai_request_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let request = OpenAiEmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input"][1], "b");
    }
}
