//! Lexical ranking functions over an [`InvertedIndex`].
//!
//! Every ranker implements [`Scorer`]; the candidate collection, sort and
//! truncation are shared through the trait's provided methods.

mod bm25;
mod tfidf;

pub use bm25::{Bm25Params, Bm25Scorer};
pub use tfidf::TfIdfScorer;

use crate::index::{IndexSnapshot, InvertedIndex};
use crate::tokenizer::tokenize;
use crate::{DocId, Paper, SimilarPaper};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A ranked hit: document ID within the index and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

pub trait Scorer: Send + Sync {
    /// Name callers select this ranker by, e.g. `"bm25"`.
    fn name(&self) -> &'static str;

    /// Score one document for already-tokenized query terms.
    fn score(&self, index: &IndexSnapshot<'_>, terms: &[String], doc_id: DocId) -> f64;

    /// Rank every document sharing at least one term with `query`.
    ///
    /// `top_k == 0` means no results. Documents with a non-positive score are
    /// dropped; ties are ordered by ascending document ID.
    fn search(&self, index: &InvertedIndex, query: &str, top_k: usize) -> Vec<ScoredDoc> {
        if top_k == 0 {
            return Vec::new();
        }
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let snapshot = index.snapshot();
        let candidates: BTreeSet<DocId> = terms
            .iter()
            .flat_map(|t| snapshot.posting_list(t).iter().map(|p| p.doc_id))
            .collect();

        let mut scored: Vec<ScoredDoc> = candidates
            .into_iter()
            .map(|doc_id| ScoredDoc { doc_id, score: self.score(&snapshot, &terms, doc_id) })
            .filter(|s| s.score > 0.0)
            .collect();
        rank(&mut scored);
        scored.truncate(top_k);
        scored
    }

    /// [`Scorer::search`] joined back to `corpus`, where document `n` is
    /// `corpus[n - 1]`. Hits without a matching entry are dropped.
    fn search_with_documents(&self, index: &InvertedIndex, query: &str, top_k: usize, corpus: &[Paper]) -> Vec<SimilarPaper> {
        self.search(index, query, top_k)
            .into_iter()
            .filter_map(|hit| {
                let paper = corpus.get((hit.doc_id as usize).checked_sub(1)?)?;
                Some(SimilarPaper::new(paper.clone(), hit.score as f32))
            })
            .collect()
    }
}

/// Descending by score, ascending doc ID on ties.
pub(crate) fn rank(hits: &mut [ScoredDoc]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.doc_id.cmp(&b.doc_id))
    });
}

/// Inverse document frequency `ln(N / df)`, or `None` for a term that occurs
/// nowhere.
pub(crate) fn idf(total_docs: u32, df: usize) -> Option<f64> {
    if df == 0 || total_docs == 0 {
        return None;
    }
    Some((total_docs as f64 / df as f64).ln())
}
