use papersift_core::index::InvertedIndex;
use papersift_core::ir::{IrEngine, IrSearchOptions};
use papersift_core::scoring::{Bm25Scorer, Scorer, TfIdfScorer};
use papersift_core::Paper;

fn learning_corpus() -> Vec<Paper> {
    let long_abstract = "We study learning in deep networks. Representation learning emerges from \
        hierarchical features, and transfer learning reuses them across tasks. Curriculum \
        learning orders examples, while meta learning adapts quickly to new problems.";
    vec![
        Paper::new("test", "1", "Machine Learning", "Introduction to machine learning algorithms"),
        Paper::new("test", "2", "Deep Learning Neural Networks", long_abstract),
        Paper::new("test", "3", "Computer Vision", "Image processing"),
    ]
}

fn titles(hits: &[papersift_core::SimilarPaper]) -> Vec<&str> { hits.iter().map(|h| h.paper.title.as_str()).collect() }

#[test]
fn bm25_learning_query_excludes_vision_paper() {
    let engine = IrEngine::new();
    engine.build_index(learning_corpus()).unwrap();

    let hits = engine.search(&IrSearchOptions::new("learning").algorithm("bm25")).unwrap();
    let mut got = titles(&hits);
    got.sort();
    assert_eq!(got, vec!["Deep Learning Neural Networks", "Machine Learning"]);
    assert!(hits.iter().all(|h| h.similarity > 0.0));

    let vision = engine.search(&IrSearchOptions::new("vision")).unwrap();
    assert_eq!(titles(&vision), vec!["Computer Vision"]);
}

#[test]
fn long_abstract_counts_every_occurrence() {
    let idx = InvertedIndex::new();
    let corpus = learning_corpus();
    idx.add_documents(corpus.iter().map(|p| (p.title.as_str(), p.abstract_text.as_str())));
    let snap = idx.snapshot();
    let p = snap.posting("learning", 2).unwrap();
    assert_eq!(p.title_freq, 1);
    assert_eq!(p.abstract_freq, 5);
    assert_eq!(p.term_freq, 6);
    assert_eq!(snap.document_frequency("learning"), 2);
}

#[test]
fn every_ranker_sorts_and_truncates() {
    let idx = InvertedIndex::new();
    let corpus = learning_corpus();
    idx.add_documents(corpus.iter().map(|p| (p.title.as_str(), p.abstract_text.as_str())));
    let rankers: [&dyn Scorer; 2] = [&Bm25Scorer::new(), &TfIdfScorer::new()];
    for ranker in rankers {
        for k in 0..4 {
            let hits = ranker.search(&idx, "learning vision image networks", k);
            assert!(hits.len() <= k.min(3));
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score), "{} unsorted", ranker.name());
        }
    }
}

#[test]
fn search_with_documents_joins_records() {
    let idx = InvertedIndex::new();
    let corpus = learning_corpus();
    idx.add_documents(corpus.iter().map(|p| (p.title.as_str(), p.abstract_text.as_str())));
    let hits = Bm25Scorer::new().search_with_documents(&idx, "image", 5, &corpus);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].paper, corpus[2]);
}

#[test]
fn tfidf_idf_shrinks_as_terms_spread() {
    // same tf in the same field; only document frequency differs
    let idx = InvertedIndex::new();
    idx.add_documents([("rare", "common"), ("filler", "common"), ("filler", "common"), ("filler", "other")]);
    let snap = idx.snapshot();
    let tfidf = TfIdfScorer::new();
    let rare = tfidf.score(&snap, &["rare".to_string()], 1);
    let common = tfidf.score(&snap, &["common".to_string()], 1);
    assert!(rare > common);
    assert!(common > 0.0);
}
