//! Hybrid retrieval core for the paper aggregator.
//!
//! Lexical ranking (TF-IDF and BM25 over an in-memory inverted index), brute
//! force cosine search over stored embeddings, and the [`search::Searcher`]
//! that dispatches between them.

pub mod config;
pub mod embed;
pub mod error;
pub mod filter;
pub mod index;
pub mod ir;
pub mod persist;
pub mod scoring;
pub mod search;
pub mod tokenizer;
pub mod vector;

mod types;

pub use error::{IndexError, SearchError};
pub use filter::{DateField, SearchCondition};
pub use types::{DocId, Paper, PaperId, SimilarPaper};
