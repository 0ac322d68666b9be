//! Embedding service interface and an OpenAI-compatible HTTP client.

use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("model returned {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{0}")]
    Other(String),
}

/// A text embedding model. Implementations never retry; failures surface to
/// the caller.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn model_name(&self) -> &str { (**self).model_name() }

    fn dimension(&self) -> usize { (**self).dimension() }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> { (**self).embed_query(text).await }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> { (**self).embed_batch(texts).await }
}

/// Fail unless `vector` has the model's declared length.
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<(), EmbedError> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch { expected, actual: vector.len() });
    }
    Ok(())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Client for any service speaking the OpenAI `/embeddings` protocol.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String { format!("{}/embeddings", self.config.api_base.trim_end_matches('/')) }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str { &self.config.model }

    fn dimension(&self) -> usize { self.config.dimension }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Malformed("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut req = self.client.post(self.endpoint()).json(&EmbeddingRequest { model: &self.config.model, input: texts });
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Status { status: status.as_u16(), body });
        }
        let mut parsed: EmbeddingResponse = resp.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(EmbedError::Malformed(format!("expected {} embeddings, got {}", texts.len(), parsed.data.len())));
        }
        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            check_dimension(v, self.config.dimension)?;
        }
        tracing::debug!(model = %self.config.model, count = vectors.len(), "embedded batch");
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn endpoint_joins_base_url() {
        let cfg = EmbeddingConfig {
            api_base: "http://localhost:11434/v1/".into(),
            api_key: None,
            model: "nomic-embed-text".into(),
            dimension: 768,
            timeout: Duration::from_secs(5),
        };
        let e = HttpEmbedder::new(cfg).unwrap();
        assert_eq!(e.endpoint(), "http://localhost:11434/v1/embeddings");
        assert_eq!(e.model_name(), "nomic-embed-text");
        assert_eq!(e.dimension(), 768);
    }

    #[test]
    fn parses_out_of_order_response() {
        let json = r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn dimension_check() {
        assert!(check_dimension(&[1.0, 2.0], 2).is_ok());
        assert!(matches!(check_dimension(&[1.0], 2), Err(EmbedError::DimensionMismatch { expected: 2, actual: 1 })));
    }
}
