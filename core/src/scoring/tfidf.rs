use super::{idf, Scorer};
use crate::config::{ABSTRACT_WEIGHT, TITLE_WEIGHT};
use crate::index::IndexSnapshot;
use crate::DocId;

/// Field-weighted TF-IDF with log-scaled term frequency.
///
/// Per term: `(1 + ln tf_title) * idf * 2.0 + (1 + ln tf_abstract) * idf * 1.0`,
/// skipping fields where the term does not occur.
#[derive(Debug, Clone, Default)]
pub struct TfIdfScorer;

impl TfIdfScorer {
    pub fn new() -> Self { Self }
}

fn field_score(freq: u32, idf: f64, weight: f64) -> f64 {
    if freq == 0 {
        return 0.0;
    }
    (1.0 + (freq as f64).ln()) * idf * weight
}

impl Scorer for TfIdfScorer {
    fn name(&self) -> &'static str { "tfidf" }

    fn score(&self, index: &IndexSnapshot<'_>, terms: &[String], doc_id: DocId) -> f64 {
        let n = index.total_docs();
        let mut total = 0.0;
        for term in terms {
            let Some(term_idf) = idf(n, index.document_frequency(term)) else { continue };
            let Some(p) = index.posting(term, doc_id) else { continue };
            if p.term_freq == 0 {
                continue;
            }
            total += field_score(p.title_freq, term_idf, TITLE_WEIGHT) + field_score(p.abstract_freq, term_idf, ABSTRACT_WEIGHT);
        }
        total
    }
}
