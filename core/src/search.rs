//! The single search entry point.
//!
//! [`Searcher`] picks one of three modes per request: lexical ranking through
//! the [`IrEngine`], a plain substring filter over storage, or cosine search
//! over stored embeddings. It keeps no per-call state.

use crate::config::{CORPUS_SNAPSHOT_LIMIT, DEFAULT_TOP_K};
use crate::embed::{check_dimension, EmbedError, Embedder};
use crate::error::{Result, SearchError};
use crate::filter::SearchCondition;
use crate::ir::{IrEngine, IrSearchOptions};
use crate::persist::{PaperStore, VectorStore};
use crate::vector;
use crate::{Paper, PaperId, SimilarPaper};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Requesting this algorithm runs every ranker and keeps the BM25 list.
pub const ALL_ALGORITHMS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Ir,
    Keyword,
    Semantic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    /// Papers whose embeddings are averaged into the query vector.
    #[serde(default)]
    pub examples: Vec<Paper>,
    /// Stored papers used as examples, loaded before embedding.
    #[serde(default)]
    pub example_ids: Vec<PaperId>,
    #[serde(default)]
    pub condition: SearchCondition,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_semantic")]
    pub semantic: bool,
    #[serde(default)]
    pub use_ir: bool,
    #[serde(default)]
    pub ir_algorithm: Option<String>,
}

fn default_top_k() -> usize { DEFAULT_TOP_K }
fn default_semantic() -> bool { true }

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            examples: Vec::new(),
            example_ids: Vec::new(),
            condition: SearchCondition::default(),
            top_k: DEFAULT_TOP_K,
            semantic: true,
            use_ir: false,
            ir_algorithm: None,
        }
    }
}

impl SearchRequest {
    pub fn semantic(query: impl Into<String>) -> Self { Self { query: query.into(), ..Self::default() } }

    pub fn keyword(query: impl Into<String>) -> Self { Self { query: query.into(), semantic: false, ..Self::default() } }

    pub fn ir(query: impl Into<String>) -> Self { Self { query: query.into(), use_ir: true, ..Self::default() } }

    /// `use_ir` wins over `semantic`.
    pub fn mode(&self) -> SearchMode {
        if self.use_ir {
            SearchMode::Ir
        } else if self.semantic {
            SearchMode::Semantic
        } else {
            SearchMode::Keyword
        }
    }
}

/// Cheap to clone: every field is a handle onto shared state.
#[derive(Clone)]
pub struct Searcher {
    store: PaperStore,
    ir: Arc<IrEngine>,
    embedder: Option<Arc<dyn Embedder>>,
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T, EmbedError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SearchError::Cancelled),
        r = fut => Ok(r?),
    }
}

/// Run storage scans and index builds off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

impl Searcher {
    pub fn new(store: PaperStore, ir: Arc<IrEngine>) -> Self { Self { store, ir, embedder: None } }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn store(&self) -> &PaperStore { &self.store }
    pub fn ir(&self) -> &IrEngine { &self.ir }
    pub fn embedder(&self) -> Option<&dyn Embedder> { self.embedder.as_deref() }

    /// Storage and lexical work runs on the blocking pool; only the embedding
    /// calls are awaited in place.
    pub async fn search(&self, req: &SearchRequest, cancel: &CancellationToken) -> Result<Vec<SimilarPaper>> {
        let mode = req.mode();
        let hits = match mode {
            SearchMode::Ir => {
                let (this, req) = (self.clone(), req.clone());
                blocking(move || this.search_ir(&req)).await?
            }
            SearchMode::Keyword => {
                let (this, req) = (self.clone(), req.clone());
                blocking(move || this.search_keyword(&req)).await?
            }
            SearchMode::Semantic => self.search_semantic(req, cancel).await?,
        };
        tracing::debug!(?mode, hits = hits.len(), "search complete");
        Ok(hits)
    }

    /// Rebuild the lexical index from every stored paper. Blocking.
    pub fn rebuild_index(&self) -> Result<usize> {
        let papers = self.store.list_papers(CORPUS_SNAPSHOT_LIMIT)?;
        let n = papers.len();
        self.ir.build_index(papers)?;
        Ok(n)
    }

    /// Store a paper and, when the lexical index is live, index it too. An
    /// update to an already stored paper rebuilds the index instead. Blocking.
    pub fn add_paper(&self, paper: &Paper) -> Result<PaperId> {
        let mut ids = self.add_papers(std::slice::from_ref(paper))?;
        ids.pop().ok_or(SearchError::EmptyCorpus)
    }

    /// Store a batch of papers. New papers are appended to a live index; if
    /// any of them was already stored the index is rebuilt once at the end.
    /// Blocking.
    pub fn add_papers(&self, papers: &[Paper]) -> Result<Vec<PaperId>> {
        let live = !self.ir.is_empty();
        let mut ids = Vec::with_capacity(papers.len());
        let mut fresh = Vec::new();
        let mut updated = false;
        for paper in papers {
            let existed = self.store.find_by_source(&paper.source, &paper.source_id)?.is_some();
            let id = self.store.upsert_paper(paper)?;
            ids.push(id);
            if existed {
                updated = true;
            } else if live {
                fresh.push(id);
            }
        }
        if !live {
            return Ok(ids);
        }
        if updated {
            self.rebuild_index()?;
        } else {
            for id in fresh {
                let stored = self.store.get_paper(id)?.ok_or(SearchError::PaperNotFound(id))?;
                self.ir.add_document(stored);
            }
        }
        Ok(ids)
    }

    fn search_ir(&self, req: &SearchRequest) -> Result<Vec<SimilarPaper>> {
        if req.query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if self.ir.build_if_empty(|| Ok(self.store.list_papers(CORPUS_SNAPSHOT_LIMIT)?))? {
            tracing::info!("lexical index built on first query");
        }

        // rank everything when a filter may drop hits, then cut to top_k
        let filtered = !req.condition.is_unrestricted();
        let fetch = if filtered { self.ir.stats().document_count } else { req.top_k };
        let mut hits = match req.ir_algorithm.as_deref() {
            Some(ALL_ALGORITHMS) => {
                let mut all = self.ir.search_multiple(&req.query, fetch, &self.ir.algorithms())?;
                all.remove(crate::config::DEFAULT_ALGORITHM).unwrap_or_default()
            }
            algorithm => {
                let mut options = IrSearchOptions::new(req.query.clone()).top_k(fetch);
                options.algorithm = algorithm.map(str::to_string);
                self.ir.search(&options)?
            }
        };
        if filtered {
            hits.retain(|h| req.condition.matches(&h.paper));
        }
        hits.truncate(req.top_k);
        Ok(hits)
    }

    fn search_keyword(&self, req: &SearchRequest) -> Result<Vec<SimilarPaper>> {
        let mut papers = self.store.keyword_search(&req.query, &req.condition)?;
        papers.truncate(req.top_k);
        Ok(papers.into_iter().map(|p| SimilarPaper::new(p, 1.0)).collect())
    }

    async fn search_semantic(&self, req: &SearchRequest, cancel: &CancellationToken) -> Result<Vec<SimilarPaper>> {
        let embedder = self.embedder.as_deref().ok_or(SearchError::EmbedderNotConfigured)?;
        let query = self.query_vector(embedder, req, cancel).await?;
        let store = self.store.clone();
        let model = embedder.model_name().to_string();
        let (condition, top_k) = (req.condition.clone(), req.top_k);
        blocking(move || Ok(store.search_similar(&query, &model, &condition, top_k)?)).await
    }

    /// The query vector for a semantic request: the mean of the example
    /// embeddings when examples are given, otherwise the query text's
    /// embedding.
    pub async fn query_vector(&self, embedder: &dyn Embedder, req: &SearchRequest, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let mut examples = req.examples.clone();
        for id in &req.example_ids {
            examples.push(self.store.get_paper(*id)?.ok_or(SearchError::PaperNotFound(*id))?);
        }

        if !examples.is_empty() {
            let texts: Vec<String> = examples.iter().map(Paper::embedding_text).collect();
            let vectors = cancellable(cancel, embedder.embed_batch(&texts)).await?;
            for v in &vectors {
                check_dimension(v, embedder.dimension())?;
            }
            let centroid = vector::centroid(&vectors).map_err(|e| EmbedError::Other(e.to_string()))?;
            return centroid.ok_or(SearchError::MissingQuery);
        }
        if req.query.trim().is_empty() {
            return Err(SearchError::MissingQuery);
        }
        let v = cancellable(cancel, embedder.embed_query(&req.query)).await?;
        check_dimension(&v, embedder.dimension())?;
        Ok(v)
    }

    /// Embed up to `batch_size` papers that lack an embedding for the active
    /// model. Failures are logged and skipped; returns how many were saved.
    /// Once `cancel` fires no new embedding calls are made, and what was
    /// already saved stays saved.
    pub async fn backfill_embeddings(&self, batch_size: usize, cancel: &CancellationToken) -> Result<usize> {
        let embedder = self.embedder.as_deref().ok_or(SearchError::EmbedderNotConfigured)?;
        let model = embedder.model_name();
        let pending = {
            let (store, model) = (self.store.clone(), model.to_string());
            blocking(move || Ok(store.papers_missing_embedding(&model, batch_size)?)).await?
        };
        let attempted = pending.len();
        let mut saved = 0;

        for paper in pending {
            let Some(id) = paper.id else { continue };
            if cancel.is_cancelled() {
                tracing::info!(saved, "backfill cancelled");
                break;
            }
            let text = paper.embedding_text();
            let embedded = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(saved, "backfill cancelled");
                    break;
                }
                r = embedder.embed_query(&text) => r,
            };
            let result = embedded
                .and_then(|v| check_dimension(&v, embedder.dimension()).map(|()| v))
                .map_err(SearchError::from)
                .and_then(|v| Ok(self.store.save_embedding(id, &text, model, &v)?));
            match result {
                Ok(()) => saved += 1,
                Err(e) => tracing::warn!(paper_id = id, error = %e, "skipping paper during backfill"),
            }
        }
        tracing::info!(saved, attempted, model, "embedding backfill finished");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_resolution() {
        assert_eq!(SearchRequest::default().mode(), SearchMode::Semantic);
        assert_eq!(SearchRequest::keyword("x").mode(), SearchMode::Keyword);
        assert_eq!(SearchRequest::ir("x").mode(), SearchMode::Ir);
        let both = SearchRequest { use_ir: true, semantic: false, ..SearchRequest::default() };
        assert_eq!(both.mode(), SearchMode::Ir);
    }

    #[test]
    fn request_defaults_from_json() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"graphs"}"#).unwrap();
        assert_eq!(req.top_k, 10);
        assert!(req.semantic);
        assert!(!req.use_ir);
        assert_eq!(req.mode(), SearchMode::Semantic);
    }

    #[tokio::test]
    async fn semantic_without_embedder_is_a_config_error() {
        let searcher = Searcher::new(PaperStore::temporary().unwrap(), Arc::new(IrEngine::new()));
        let err = searcher.search(&SearchRequest::semantic("graphs"), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchError::EmbedderNotConfigured));
        let err = searcher.backfill_embeddings(10, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchError::EmbedderNotConfigured));
    }

    #[tokio::test]
    async fn ir_mode_rejects_empty_query() {
        let searcher = Searcher::new(PaperStore::temporary().unwrap(), Arc::new(IrEngine::new()));
        let err = searcher.search(&SearchRequest::ir(""), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchError::EmptyQuery));
    }
}
