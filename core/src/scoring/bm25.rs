use super::{idf, Scorer};
use crate::config::{ABSTRACT_WEIGHT, BM25_B, BM25_K1, TITLE_WEIGHT, UBIQUITOUS_TERM_IDF};
use crate::index::IndexSnapshot;
use crate::DocId;
use serde::{Deserialize, Serialize};

/// Tunable BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: BM25_K1, b: BM25_B } }
}

/// Okapi BM25 with a title/abstract boost applied after the base score.
#[derive(Debug, Clone, Default)]
pub struct Bm25Scorer {
    params: Bm25Params,
}

impl Bm25Scorer {
    pub fn new() -> Self { Self::default() }

    pub fn with_params(params: Bm25Params) -> Self { Self { params } }

    pub fn params(&self) -> Bm25Params { self.params }

    pub fn set_parameters(&mut self, k1: f64, b: f64) { self.params = Bm25Params { k1, b }; }

    /// `ln(N/df)`, floored at a small constant for terms every document has so
    /// they still count for something.
    fn term_idf(total_docs: u32, df: usize) -> Option<f64> {
        if df > 0 && df == total_docs as usize {
            return Some(UBIQUITOUS_TERM_IDF);
        }
        idf(total_docs, df)
    }
}

impl Scorer for Bm25Scorer {
    fn name(&self) -> &'static str { "bm25" }

    fn score(&self, index: &IndexSnapshot<'_>, terms: &[String], doc_id: DocId) -> f64 {
        let doc_len = index.document_length(doc_id) as f64;
        let avg_len = index.average_document_length();
        if doc_len == 0.0 || avg_len == 0.0 {
            return 0.0;
        }
        let Bm25Params { k1, b } = self.params;
        let n = index.total_docs();

        let mut total = 0.0;
        for term in terms {
            let Some(term_idf) = Self::term_idf(n, index.document_frequency(term)) else { continue };
            let Some(p) = index.posting(term, doc_id) else { continue };
            if p.term_freq == 0 {
                continue;
            }
            let tf = p.term_freq as f64;
            let base = term_idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * (doc_len / avg_len)));

            let title_share = p.title_freq as f64 / tf;
            let abstract_share = p.abstract_freq as f64 / tf;
            let boost = (1.0 + (TITLE_WEIGHT - 1.0) * title_share) * (1.0 + (ABSTRACT_WEIGHT - 1.0) * abstract_share);
            total += base * boost;
        }
        total
    }
}
