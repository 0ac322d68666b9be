//! In-memory inverted index over paper titles and abstracts.
//!
//! Postings keep title and abstract counts apart so scorers can weight the
//! fields. All state sits behind one reader-writer lock: readers take a
//! [`IndexSnapshot`] and see a consistent view for as long as they hold it.

use crate::error::IndexError;
use crate::tokenizer::tokenize_with_counts;
use crate::DocId;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    /// `title_freq + abstract_freq`
    pub term_freq: u32,
    pub title_freq: u32,
    pub abstract_freq: u32,
}

#[derive(Debug, Default)]
struct IndexState {
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: BTreeMap<DocId, u32>,
    total_docs: u32,
    avg_doc_length: f64,
    next_doc_id: DocId,
}

impl IndexState {
    fn fresh() -> Self { Self { next_doc_id: 1, ..Self::default() } }

    fn insert(&mut self, doc_id: DocId, title: &str, abstract_text: &str) {
        let title_counts = tokenize_with_counts(title);
        let abstract_counts = tokenize_with_counts(abstract_text);
        let title_len: u32 = title_counts.values().sum();
        let abstract_len: u32 = abstract_counts.values().sum();

        let mut per_term: HashMap<&str, (u32, u32)> = HashMap::with_capacity(title_counts.len() + abstract_counts.len());
        for (term, n) in &title_counts {
            per_term.entry(term.as_str()).or_default().0 = *n;
        }
        for (term, n) in &abstract_counts {
            per_term.entry(term.as_str()).or_default().1 = *n;
        }
        for (term, (title_freq, abstract_freq)) in per_term {
            let list = self.postings.entry(term.to_string()).or_default();
            let at = list.partition_point(|p| p.doc_id < doc_id);
            list.insert(at, Posting { doc_id, term_freq: title_freq + abstract_freq, title_freq, abstract_freq });
        }

        self.doc_lengths.insert(doc_id, title_len + abstract_len);
        self.total_docs += 1;
        self.next_doc_id = self.next_doc_id.max(doc_id + 1);
        // full pass, the corpus is small enough
        let sum: u64 = self.doc_lengths.values().map(|&l| l as u64).sum();
        self.avg_doc_length = sum as f64 / self.total_docs as f64;
    }
}

/// Term → postings map plus the length statistics ranking needs.
///
/// Documents are immutable once added; [`InvertedIndex::clear`] is the only way
/// to drop them. IDs come from a counter owned by the index, so batch and
/// single adds can be mixed without collisions.
#[derive(Debug)]
pub struct InvertedIndex {
    state: RwLock<IndexState>,
}

impl Default for InvertedIndex {
    fn default() -> Self { Self::new() }
}

impl InvertedIndex {
    pub fn new() -> Self { Self { state: RwLock::new(IndexState::fresh()) } }

    /// Index one document under a caller-chosen ID.
    pub fn add_document(&self, doc_id: DocId, title: &str, abstract_text: &str) -> Result<(), IndexError> {
        if doc_id == 0 {
            return Err(IndexError::ReservedId);
        }
        let mut state = self.state.write();
        if state.doc_lengths.contains_key(&doc_id) {
            return Err(IndexError::DuplicateDocument(doc_id));
        }
        state.insert(doc_id, title, abstract_text);
        Ok(())
    }

    /// Index one document under the next free ID and return it.
    pub fn push_document(&self, title: &str, abstract_text: &str) -> DocId {
        let mut state = self.state.write();
        let doc_id = state.next_doc_id;
        state.insert(doc_id, title, abstract_text);
        doc_id
    }

    /// Index `(title, abstract)` pairs in order. On a fresh index the assigned
    /// IDs are `1..=N`.
    pub fn add_documents<'a, I>(&self, docs: I) -> Vec<DocId>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = self.state.write();
        docs.into_iter()
            .map(|(title, abstract_text)| {
                let doc_id = state.next_doc_id;
                state.insert(doc_id, title, abstract_text);
                doc_id
            })
            .collect()
    }

    pub fn clear(&self) { *self.state.write() = IndexState::fresh(); }

    /// Read view held for the duration of a scoring pass.
    pub fn snapshot(&self) -> IndexSnapshot<'_> { IndexSnapshot { state: self.state.read() } }

    pub fn posting_list(&self, term: &str) -> Vec<Posting> { self.snapshot().posting_list(term).to_vec() }
    pub fn document_frequency(&self, term: &str) -> usize { self.snapshot().document_frequency(term) }
    pub fn term_frequency(&self, term: &str, doc_id: DocId) -> u32 { self.snapshot().term_frequency(term, doc_id) }
    pub fn document_length(&self, doc_id: DocId) -> u32 { self.snapshot().document_length(doc_id) }
    pub fn average_document_length(&self) -> f64 { self.snapshot().average_document_length() }
    pub fn total_docs(&self) -> u32 { self.snapshot().total_docs() }
    pub fn vocabulary_size(&self) -> usize { self.snapshot().vocabulary_size() }
}

/// Consistent read-only view of an [`InvertedIndex`]. Writers block until it
/// is dropped.
pub struct IndexSnapshot<'a> {
    state: RwLockReadGuard<'a, IndexState>,
}

impl IndexSnapshot<'_> {
    /// Postings for `term`, ordered by document ID.
    pub fn posting_list(&self, term: &str) -> &[Posting] {
        self.state.postings.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn posting(&self, term: &str, doc_id: DocId) -> Option<&Posting> {
        let list = self.posting_list(term);
        list.binary_search_by_key(&doc_id, |p| p.doc_id).ok().map(|i| &list[i])
    }

    pub fn document_frequency(&self, term: &str) -> usize { self.posting_list(term).len() }

    pub fn term_frequency(&self, term: &str, doc_id: DocId) -> u32 {
        self.posting(term, doc_id).map_or(0, |p| p.term_freq)
    }

    pub fn document_length(&self, doc_id: DocId) -> u32 { self.state.doc_lengths.get(&doc_id).copied().unwrap_or(0) }
    pub fn average_document_length(&self) -> f64 { self.state.avg_doc_length }
    pub fn total_docs(&self) -> u32 { self.state.total_docs }
    pub fn vocabulary_size(&self) -> usize { self.state.postings.len() }
}
