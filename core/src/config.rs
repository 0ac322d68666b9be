//! Tuning constants and environment-driven settings.

use std::time::Duration;

/// BM25 term-frequency saturation.
pub const BM25_K1: f64 = 1.5;
/// BM25 length normalization.
pub const BM25_B: f64 = 0.75;
/// IDF floor for a term present in every document.
pub const UBIQUITOUS_TERM_IDF: f64 = 0.1;

pub const TITLE_WEIGHT: f64 = 2.0;
pub const ABSTRACT_WEIGHT: f64 = 1.0;

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_ALGORITHM: &str = "bm25";

/// Upper bound on papers loaded when the IR index is built lazily from storage.
pub const CORPUS_SNAPSHOT_LIMIT: usize = 1_000_000;

pub const DEFAULT_BACKFILL_BATCH: usize = 100;

const DEFAULT_EMBEDDING_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

/// Settings for the remote embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl EmbeddingConfig {
    /// Reads `EMBEDDING_*` variables. Returns `None` when no model is named,
    /// which leaves semantic search unconfigured.
    pub fn from_env() -> Option<Self> {
        let model = std::env::var("EMBEDDING_MODEL").ok().filter(|m| !m.trim().is_empty())?;
        let dimension = std::env::var("EMBEDDING_DIM").ok().and_then(|s| s.parse().ok()).unwrap_or(1536);
        let timeout = std::env::var("EMBEDDING_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EMBEDDING_TIMEOUT_SECS);
        Some(Self {
            api_base: std::env::var("EMBEDDING_API_BASE").unwrap_or_else(|_| DEFAULT_EMBEDDING_API_BASE.to_string()),
            api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            model,
            dimension,
            timeout: Duration::from_secs(timeout),
        })
    }
}
