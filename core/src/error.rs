//! Error types shared across the retrieval core.

use crate::embed::EmbedError;
use crate::persist::StoreError;
use crate::DocId;
use thiserror::Error;

/// Errors raised while mutating the inverted index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Document IDs start at 1.
    #[error("document id 0 is reserved")]
    ReservedId,
    /// The ID already has postings in this index lifetime.
    #[error("document {0} is already indexed")]
    DuplicateDocument(DocId),
}

/// Errors surfaced by the IR orchestrator and the unified searcher.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Semantic mode requested without an embedding service.
    #[error("no embedding service configured")]
    EmbedderNotConfigured,
    #[error("query text is empty")]
    EmptyQuery,
    /// Semantic mode with neither query text nor example documents.
    #[error("either query text or example documents are required")]
    MissingQuery,
    #[error("unknown ranking algorithm: {0}")]
    UnknownAlgorithm(String),
    /// `build_index` called with no documents.
    #[error("cannot build an index from an empty document set")]
    EmptyCorpus,
    #[error("index has no documents")]
    IndexEmpty,
    #[error("paper {0} not found")]
    PaperNotFound(u64),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),
    #[error("storage failed: {0}")]
    Storage(#[from] StoreError),
    #[error("search cancelled")]
    Cancelled,
    /// A blocking storage or indexing task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SearchError {
    /// True for errors caused by the request rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SearchError::EmptyQuery
                | SearchError::MissingQuery
                | SearchError::UnknownAlgorithm(_)
                | SearchError::EmptyCorpus
                | SearchError::IndexEmpty
                | SearchError::Index(_)
        )
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
