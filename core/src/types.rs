use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Position of a document inside one inverted index lifetime, starting at 1.
pub type DocId = u32;
/// Durable key of a paper in the store.
pub type PaperId = u64;

/// A normalized paper as produced by the ingestion side.
///
/// Only `title` and `abstract_text` are scored; the rest is metadata used for
/// filtering and display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    #[serde(default)]
    pub id: Option<PaperId>,
    pub source: String,
    pub source_id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub submitted_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub announced_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Paper {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self { source: source.into(), source_id: source_id.into(), title: title.into(), abstract_text: abstract_text.into(), ..Self::default() }
    }

    /// Text handed to the embedding model: the title, plus the abstract after a
    /// blank line when there is one.
    pub fn embedding_text(&self) -> String {
        if self.abstract_text.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.abstract_text)
        }
    }
}

/// A paper paired with the score that ranked it.
///
/// `similarity` is cosine similarity in semantic mode, the raw BM25/TF-IDF
/// score in IR mode and a constant `1.0` in keyword mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPaper {
    #[serde(flatten)]
    pub paper: Paper,
    pub similarity: f32,
}

impl SimilarPaper {
    pub fn new(paper: Paper, similarity: f32) -> Self { Self { paper, similarity } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_joins_title_and_abstract() {
        let p = Paper::new("arxiv", "1", "Title", "Body");
        assert_eq!(p.embedding_text(), "Title\n\nBody");
        let bare = Paper::new("arxiv", "2", "Only title", "");
        assert_eq!(bare.embedding_text(), "Only title");
    }

    #[test]
    fn deserializes_crawler_json() {
        let json = r#"{"source":"arxiv","source_id":"2401.00001","title":"T","abstract":"A",
            "categories":["cs.IR"],"submitted_at":"2024-01-02T03:04:05Z"}"#;
        let p: Paper = serde_json::from_str(json).unwrap();
        assert_eq!(p.abstract_text, "A");
        assert_eq!(p.categories, vec!["cs.IR".to_string()]);
        assert_eq!(p.submitted_at.unwrap().year(), 2024);
        assert!(p.announced_at.is_none());
        assert!(p.id.is_none());
    }
}
