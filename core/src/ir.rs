//! Lexical retrieval over the live paper set.
//!
//! [`IrEngine`] owns the paper list, the [`InvertedIndex`] built from it and
//! every registered [`Scorer`]. A coarse reader-writer lock makes rebuilds and
//! clears exclusive with searches.

use crate::config::{DEFAULT_ALGORITHM, DEFAULT_TOP_K};
use crate::error::{Result, SearchError};
use crate::index::InvertedIndex;
use crate::scoring::{Bm25Params, Bm25Scorer, Scorer, TfIdfScorer};
use crate::{DocId, Paper, SimilarPaper};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IrSearchOptions {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl IrSearchOptions {
    pub fn new(query: impl Into<String>) -> Self { Self { query: query.into(), ..Self::default() } }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub vocabulary_size: usize,
    pub total_docs: u32,
    pub average_doc_length: f64,
    pub k1: f64,
    pub b: f64,
}

/// The registered rankers. Dispatch goes through [`ScorerSet::get`], so a new
/// ranker only needs a field and an entry in [`ScorerSet::all`].
#[derive(Debug, Default)]
struct ScorerSet {
    tfidf: TfIdfScorer,
    bm25: Bm25Scorer,
}

impl ScorerSet {
    fn all(&self) -> [&dyn Scorer; 2] { [&self.bm25, &self.tfidf] }

    fn get(&self, name: &str) -> Option<&dyn Scorer> {
        self.all().into_iter().find(|s| s.name().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Default)]
struct EngineState {
    papers: Vec<Paper>,
    index: InvertedIndex,
    scorers: ScorerSet,
}

#[derive(Debug, Default)]
pub struct IrEngine {
    state: RwLock<EngineState>,
}

impl IrEngine {
    pub fn new() -> Self { Self::default() }

    /// Replace the paper list and index it from scratch.
    pub fn build_index(&self, papers: Vec<Paper>) -> Result<()> {
        if papers.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }
        let mut state = self.state.write();
        Self::rebuild(&mut state, papers);
        Ok(())
    }

    /// Build from `load` unless the index already holds documents. The check
    /// and the build happen under one write lock, so concurrent first queries
    /// build once.
    pub fn build_if_empty<F>(&self, load: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Vec<Paper>>,
    {
        if self.state.read().index.total_docs() > 0 {
            return Ok(false);
        }
        let mut state = self.state.write();
        if state.index.total_docs() > 0 {
            return Ok(false);
        }
        let papers = load()?;
        if papers.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }
        Self::rebuild(&mut state, papers);
        Ok(true)
    }

    fn rebuild(state: &mut EngineState, papers: Vec<Paper>) {
        state.index.clear();
        state.index.add_documents(papers.iter().map(|p| (p.title.as_str(), p.abstract_text.as_str())));
        state.papers = papers;
        tracing::info!(
            num_docs = state.index.total_docs(),
            vocabulary = state.index.vocabulary_size(),
            "built lexical index"
        );
    }

    /// Append one paper and index it incrementally.
    pub fn add_document(&self, paper: Paper) -> DocId {
        let mut state = self.state.write();
        let doc_id = state.index.push_document(&paper.title, &paper.abstract_text);
        state.papers.push(paper);
        debug_assert_eq!(doc_id as usize, state.papers.len());
        doc_id
    }

    pub fn search(&self, options: &IrSearchOptions) -> Result<Vec<SimilarPaper>> {
        if options.query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let state = self.state.read();
        if state.index.total_docs() == 0 {
            return Err(SearchError::IndexEmpty);
        }
        let name = options.algorithm.as_deref().unwrap_or(DEFAULT_ALGORITHM);
        let scorer = state.scorers.get(name).ok_or_else(|| SearchError::UnknownAlgorithm(name.to_string()))?;
        let top_k = options.top_k.unwrap_or(DEFAULT_TOP_K);
        let hits = scorer.search_with_documents(&state.index, &options.query, top_k, &state.papers);
        tracing::debug!(algorithm = scorer.name(), hits = hits.len(), "lexical search");
        Ok(hits)
    }

    /// Run `query` through each named ranker. Every name is validated before
    /// any ranking happens.
    pub fn search_multiple(&self, query: &str, top_k: usize, algorithms: &[&str]) -> Result<BTreeMap<String, Vec<SimilarPaper>>> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let state = self.state.read();
        if state.index.total_docs() == 0 {
            return Err(SearchError::IndexEmpty);
        }
        let scorers = algorithms
            .iter()
            .map(|name| state.scorers.get(name).ok_or_else(|| SearchError::UnknownAlgorithm(name.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(scorers
            .into_iter()
            .map(|s| (s.name().to_string(), s.search_with_documents(&state.index, query, top_k, &state.papers)))
            .collect())
    }

    /// Names of every registered ranker.
    pub fn algorithms(&self) -> Vec<&'static str> { self.state.read().scorers.all().iter().map(|s| s.name()).collect() }

    /// Drop all papers and start over with a fresh index and default rankers.
    pub fn clear(&self) { *self.state.write() = EngineState::default(); }

    pub fn set_parameters(&self, k1: f64, b: f64) { self.state.write().scorers.bm25.set_parameters(k1, b); }

    pub fn parameters(&self) -> Bm25Params { self.state.read().scorers.bm25.params() }

    pub fn is_empty(&self) -> bool { self.state.read().index.total_docs() == 0 }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        let Bm25Params { k1, b } = state.scorers.bm25.params();
        IndexStats {
            document_count: state.papers.len(),
            vocabulary_size: state.index.vocabulary_size(),
            total_docs: state.index.total_docs(),
            average_doc_length: state.index.average_document_length(),
            k1,
            b,
        }
    }
}
