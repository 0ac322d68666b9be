//! sled-backed storage for papers and their embeddings.
//!
//! Trees:
//! - `papers`: big-endian paper id → bincode [`Paper`]
//! - `source_keys`: `source \0 source_id` → paper id
//! - `embeddings`: big-endian paper id → bincode [`EmbeddingRecord`]
//!
//! Paper ids come from [`sled::Db::generate_id`], so key order is insertion
//! order.

use crate::filter::SearchCondition;
use crate::vector::{self, VectorError};
use crate::{Paper, PaperId, SimilarPaper};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("paper {0} not found")]
    NotFound(PaperId),
}

/// The one embedding a paper has. Saving again replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Exact text that was embedded.
    pub text: String,
    pub model: String,
    /// Little-endian `f32` blob, see [`crate::vector`].
    pub vector: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl EmbeddingRecord {
    pub fn decode(&self) -> Result<Vec<f32>, VectorError> { vector::decode(&self.vector) }
}

/// Where embeddings live and how they are searched.
///
/// The sled implementation is an exact brute-force scan; an approximate index
/// can sit behind the same trait.
pub trait VectorStore: Send + Sync {
    fn save_embedding(&self, id: PaperId, text: &str, model: &str, embedding: &[f32]) -> Result<(), StoreError>;

    /// Papers embedded by `model` that satisfy `condition`, ranked by cosine
    /// similarity to `query`, at most `top_k` of them.
    fn search_similar(&self, query: &[f32], model: &str, condition: &SearchCondition, top_k: usize) -> Result<Vec<SimilarPaper>, StoreError>;
}

#[derive(Clone)]
pub struct PaperStore {
    db: sled::Db,
    papers: sled::Tree,
    source_keys: sled::Tree,
    embeddings: sled::Tree,
}

fn id_key(id: PaperId) -> [u8; 8] { id.to_be_bytes() }

fn key_id(key: &[u8]) -> Option<PaperId> { <[u8; 8]>::try_from(key).ok().map(PaperId::from_be_bytes) }

fn source_key(source: &str, source_id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(source.len() + source_id.len() + 1);
    k.extend_from_slice(source.as_bytes());
    k.push(0);
    k.extend_from_slice(source_id.as_bytes());
    k
}

impl PaperStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> { Self::from_db(sled::open(path)?) }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self, StoreError> { Self::from_db(sled::Config::new().temporary(true).open()?) }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            papers: db.open_tree("papers")?,
            source_keys: db.open_tree("source_keys")?,
            embeddings: db.open_tree("embeddings")?,
            db,
        })
    }

    /// Insert a paper, or update the stored one with the same
    /// `(source, source_id)`. Returns the paper id.
    pub fn upsert_paper(&self, paper: &Paper) -> Result<PaperId, StoreError> {
        let skey = source_key(&paper.source, &paper.source_id);
        let id = match self.source_keys.get(&skey)?.as_deref().and_then(key_id) {
            Some(id) => id,
            None => {
                let fresh = self.db.generate_id()? + 1;
                match self.source_keys.compare_and_swap(&skey, None as Option<&[u8]>, Some(&id_key(fresh)[..]))? {
                    Ok(()) => fresh,
                    // another writer claimed the key first; share its id
                    Err(taken) => taken.current.as_deref().and_then(key_id).ok_or(StoreError::NotFound(fresh))?,
                }
            }
        };
        let mut stored = paper.clone();
        stored.id = Some(id);
        self.papers.insert(id_key(id), bincode::serialize(&stored)?)?;
        Ok(id)
    }

    pub fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<PaperId>, StoreError> {
        Ok(self.source_keys.get(source_key(source, source_id))?.as_deref().and_then(key_id))
    }

    pub fn get_paper(&self, id: PaperId) -> Result<Option<Paper>, StoreError> {
        match self.papers.get(id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Up to `limit` papers in insertion order.
    pub fn list_papers(&self, limit: usize) -> Result<Vec<Paper>, StoreError> {
        self.papers
            .iter()
            .take(limit)
            .map(|entry| -> Result<Paper, StoreError> {
                let (_, bytes) = entry?;
                Ok(bincode::deserialize(&bytes)?)
            })
            .collect()
    }

    pub fn paper_count(&self) -> usize { self.papers.len() }

    pub fn embedding_count(&self) -> usize { self.embeddings.len() }

    /// Case-sensitive substring match on title or abstract, filtered by
    /// `condition`, in storage order.
    pub fn keyword_search(&self, keyword: &str, condition: &SearchCondition) -> Result<Vec<Paper>, StoreError> {
        let limit = condition.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for entry in self.papers.iter() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = entry?;
            let paper: Paper = bincode::deserialize(&bytes)?;
            if (paper.title.contains(keyword) || paper.abstract_text.contains(keyword)) && condition.matches(&paper) {
                out.push(paper);
            }
        }
        Ok(out)
    }

    pub fn get_embedding(&self, id: PaperId) -> Result<Option<EmbeddingRecord>, StoreError> {
        match self.embeddings.get(id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Up to `limit` papers with no embedding, or one from a model other than
    /// `model`.
    pub fn papers_missing_embedding(&self, model: &str, limit: usize) -> Result<Vec<Paper>, StoreError> {
        let mut out = Vec::new();
        for entry in self.papers.iter() {
            if out.len() >= limit {
                break;
            }
            let (key, bytes) = entry?;
            // an unreadable record counts as missing so backfill overwrites it
            let current = match self.embeddings.get(&key)? {
                Some(rec) => bincode::deserialize::<EmbeddingRecord>(&rec).ok(),
                None => None,
            };
            if current.map_or(true, |rec| rec.model != model) {
                out.push(bincode::deserialize(&bytes)?);
            }
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl VectorStore for PaperStore {
    fn save_embedding(&self, id: PaperId, text: &str, model: &str, embedding: &[f32]) -> Result<(), StoreError> {
        if !self.papers.contains_key(id_key(id))? {
            return Err(StoreError::NotFound(id));
        }
        let record = EmbeddingRecord {
            text: text.to_string(),
            model: model.to_string(),
            vector: vector::encode(embedding),
            updated_at: OffsetDateTime::now_utc(),
        };
        self.embeddings.insert(id_key(id), bincode::serialize(&record)?)?;
        Ok(())
    }

    fn search_similar(&self, query: &[f32], model: &str, condition: &SearchCondition, top_k: usize) -> Result<Vec<SimilarPaper>, StoreError> {
        let top_k = condition.limit.map_or(top_k, |l| l.min(top_k));
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(PaperId, f32, Paper)> = Vec::new();
        for entry in self.embeddings.iter() {
            let (key, bytes) = entry?;
            let Some(id) = key_id(&key) else { continue };
            let record: EmbeddingRecord = match bincode::deserialize(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(paper_id = id, error = %e, "skipping unreadable embedding record");
                    continue;
                }
            };
            if record.model != model {
                continue;
            }
            let Some(paper) = self.get_paper(id)? else { continue };
            if !condition.matches(&paper) {
                continue;
            }
            let stored = match vector::decode_with_dim(&record.vector, query.len()) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(paper_id = id, error = %e, "skipping unusable embedding");
                    continue;
                }
            };
            scored.push((id, vector::cosine_similarity(query, &stored), paper));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(_, sim, paper)| SimilarPaper::new(paper, sim)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(papers: &[(&str, &str, &str)]) -> (PaperStore, Vec<PaperId>) {
        let store = PaperStore::temporary().unwrap();
        let ids = papers
            .iter()
            .enumerate()
            .map(|(i, (source, title, abs))| store.upsert_paper(&Paper::new(*source, i.to_string(), *title, *abs)).unwrap())
            .collect();
        (store, ids)
    }

    #[test]
    fn upsert_dedups_on_source_key() {
        let store = PaperStore::temporary().unwrap();
        let a = store.upsert_paper(&Paper::new("arxiv", "1", "Old title", "")).unwrap();
        let b = store.upsert_paper(&Paper::new("arxiv", "1", "New title", "")).unwrap();
        let c = store.upsert_paper(&Paper::new("acl", "1", "Other", "")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.paper_count(), 2);
        let p = store.get_paper(a).unwrap().unwrap();
        assert_eq!(p.title, "New title");
        assert_eq!(p.id, Some(a));
    }

    #[test]
    fn list_keeps_insertion_order() {
        let (store, ids) = store_with(&[("s", "first", ""), ("s", "second", ""), ("s", "third", "")]);
        let titles: Vec<String> = store.list_papers(10).unwrap().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
        assert_eq!(store.list_papers(2).unwrap().len(), 2);
        assert!(ids[0] < ids[1] && ids[1] < ids[2]);
    }

    #[test]
    fn keyword_search_is_case_sensitive_substring() {
        let (store, _) = store_with(&[
            ("arxiv", "Graph Neural Networks", ""),
            ("acl", "Parsing", "neural parsers"),
            ("arxiv", "Vision", "images"),
        ]);
        assert_eq!(store.keyword_search("Neural", &SearchCondition::default()).unwrap().len(), 1);
        assert_eq!(store.keyword_search("eural", &SearchCondition::default()).unwrap().len(), 2);
        let arxiv_only = SearchCondition { sources: Some(vec!["arxiv".into()]), ..Default::default() };
        assert_eq!(store.keyword_search("eural", &arxiv_only).unwrap().len(), 1);
        let limited = SearchCondition { limit: Some(1), ..Default::default() };
        assert_eq!(store.keyword_search("", &limited).unwrap().len(), 1);
    }

    #[test]
    fn embedding_overwrites_previous() {
        let (store, ids) = store_with(&[("s", "a", "")]);
        store.save_embedding(ids[0], "a", "m1", &[1.0, 0.0]).unwrap();
        store.save_embedding(ids[0], "a again", "m2", &[0.5, 0.5, 0.5]).unwrap();
        let rec = store.get_embedding(ids[0]).unwrap().unwrap();
        assert_eq!(rec.model, "m2");
        assert_eq!(rec.text, "a again");
        assert_eq!(rec.decode().unwrap(), vec![0.5, 0.5, 0.5]);
        assert_eq!(store.embedding_count(), 1);
    }

    #[test]
    fn saving_for_unknown_paper_fails() {
        let store = PaperStore::temporary().unwrap();
        assert!(matches!(store.save_embedding(42, "t", "m", &[1.0]), Err(StoreError::NotFound(42))));
    }

    #[test]
    fn missing_embeddings_include_stale_models() {
        let (store, ids) = store_with(&[("s", "a", ""), ("s", "b", ""), ("s", "c", "")]);
        store.save_embedding(ids[0], "a", "current", &[1.0]).unwrap();
        store.save_embedding(ids[1], "b", "old", &[1.0]).unwrap();
        let missing: Vec<String> = store.papers_missing_embedding("current", 10).unwrap().into_iter().map(|p| p.title).collect();
        assert_eq!(missing, vec!["b", "c"]);
        assert_eq!(store.papers_missing_embedding("current", 1).unwrap().len(), 1);
    }

    #[test]
    fn similarity_search_ranks_and_filters() {
        let (store, ids) = store_with(&[("arxiv", "x", ""), ("arxiv", "y", ""), ("acl", "xy", ""), ("arxiv", "other model", "")]);
        store.save_embedding(ids[0], "x", "m", &[1.0, 0.0]).unwrap();
        store.save_embedding(ids[1], "y", "m", &[0.0, 1.0]).unwrap();
        store.save_embedding(ids[2], "xy", "m", &[1.0, 1.0]).unwrap();
        store.save_embedding(ids[3], "o", "other", &[1.0, 0.0]).unwrap();

        let hits = store.search_similar(&[1.0, 0.0], "m", &SearchCondition::default(), 10).unwrap();
        let titles: Vec<&str> = hits.iter().map(|h| h.paper.title.as_str()).collect();
        assert_eq!(titles, vec!["x", "xy", "y"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits[2].similarity.abs() < 1e-6);

        let arxiv = SearchCondition { sources: Some(vec!["arxiv".into()]), ..Default::default() };
        assert_eq!(store.search_similar(&[1.0, 0.0], "m", &arxiv, 10).unwrap().len(), 2);
        assert_eq!(store.search_similar(&[1.0, 0.0], "m", &SearchCondition::default(), 1).unwrap().len(), 1);
        assert!(store.search_similar(&[1.0, 0.0], "m", &SearchCondition::default(), 0).unwrap().is_empty());
    }

    #[test]
    fn similarity_search_skips_wrong_dimension() {
        let (store, ids) = store_with(&[("s", "good", ""), ("s", "bad", "")]);
        store.save_embedding(ids[0], "good", "m", &[1.0, 0.0]).unwrap();
        store.save_embedding(ids[1], "bad", "m", &[1.0, 0.0, 0.0]).unwrap();
        let hits = store.search_similar(&[1.0, 0.0], "m", &SearchCondition::default(), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].paper.title, "good");
    }

    #[test]
    fn corrupt_embedding_row_is_skipped_and_refilled() {
        let (store, ids) = store_with(&[("s", "good", ""), ("s", "garbled", "")]);
        store.save_embedding(ids[0], "good", "m", &[1.0, 0.0]).unwrap();
        store.embeddings.insert(id_key(ids[1]), &[0xde, 0xad, 0xbe][..]).unwrap();

        let hits = store.search_similar(&[1.0, 0.0], "m", &SearchCondition::default(), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].paper.title, "good");

        let missing = store.papers_missing_embedding("m", 10).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].title, "garbled");

        store.save_embedding(ids[1], "garbled", "m", &[0.0, 1.0]).unwrap();
        assert_eq!(store.search_similar(&[1.0, 0.0], "m", &SearchCondition::default(), 10).unwrap().len(), 2);
        assert!(store.papers_missing_embedding("m", 10).unwrap().is_empty());
    }

    #[test]
    fn racing_upserts_share_one_id() {
        let store = PaperStore::temporary().unwrap();
        let barrier = std::sync::Barrier::new(8);
        let ids: Vec<PaperId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let (store, barrier) = (&store, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        store.upsert_paper(&Paper::new("arxiv", "2401.00001", format!("draft {i}"), "")).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.paper_count(), 1);
        assert_eq!(store.find_by_source("arxiv", "2401.00001").unwrap(), Some(ids[0]));
    }
}
