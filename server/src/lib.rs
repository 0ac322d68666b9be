use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use papersift_core::ir::IndexStats;
use papersift_core::scoring::Bm25Params;
use papersift_core::search::{SearchMode, SearchRequest, Searcher};
use papersift_core::tokenizer::tokenize;
use papersift_core::{Paper, PaperId, SearchError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const SNIPPET_BEFORE: usize = 80;
const SNIPPET_LEN: usize = 240;

#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<Searcher>,
    pub admin_token: Option<String>,
    /// Parent of every per-request token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(searcher: Arc<Searcher>, admin_token: Option<String>) -> Self {
        Self { searcher, admin_token, shutdown: CancellationToken::new() }
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub paper: Paper,
    pub similarity: f32,
    pub snippet: Option<String>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub index: IndexStats,
    pub papers: usize,
    pub embeddings: usize,
    pub algorithms: Vec<&'static str>,
    pub embedding_model: Option<String>,
}

#[derive(Deserialize)]
pub struct BackfillParams {
    pub batch_size: Option<usize>,
}

/// One paper or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum IngestBody {
    Many(Vec<Paper>),
    One(Box<Paper>),
}

/// A failed request: status plus a `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self { Self { status, message: message.into() } }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        let status = match &e {
            SearchError::PaperNotFound(_) => StatusCode::NOT_FOUND,
            SearchError::EmbedderNotConfigured | SearchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            SearchError::Embedding(_) => StatusCode::BAD_GATEWAY,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %e, %status, "request failed");
        }
        ApiError::new(status, e.to_string())
    }
}

fn cors_layer() -> CorsLayer {
    // CORS_ALLOW_ORIGIN is a comma-separated list; anything else allows any origin
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", post(search_handler))
        .route("/papers/:id", get(paper_handler))
        .route("/index/stats", get(stats_handler))
        .route("/index/build", post(build_handler))
        .route("/index/documents", post(documents_handler))
        .route("/index/clear", post(clear_handler))
        .route("/index/bm25", put(bm25_handler))
        .route("/embeddings/backfill", post(backfill_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

pub async fn search_handler(State(state): State<AppState>, Json(req): Json<SearchRequest>) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let cancel = state.shutdown.child_token();
    let hits = state.searcher.search(&req, &cancel).await?;

    let terms = tokenize(&req.query);
    let results: Vec<SearchHit> = hits
        .into_iter()
        .map(|h| {
            let snippet = snippet(&h.paper.abstract_text, &terms);
            SearchHit { paper: h.paper, similarity: h.similarity, snippet }
        })
        .collect();
    Ok(Json(SearchResponse {
        query: req.query.clone(),
        mode: req.mode(),
        took_s: start.elapsed().as_secs_f64(),
        total_hits: results.len(),
        results,
    }))
}

pub async fn paper_handler(State(state): State<AppState>, Path(id): Path<PaperId>) -> Result<Json<Paper>, ApiError> {
    let paper = state.searcher.store().get_paper(id).map_err(SearchError::from)?;
    paper.map(Json).ok_or_else(|| SearchError::PaperNotFound(id).into())
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let s = &state.searcher;
    Json(StatsResponse {
        index: s.ir().stats(),
        papers: s.store().paper_count(),
        embeddings: s.store().embedding_count(),
        algorithms: s.ir().algorithms(),
        embedding_model: s.embedder().map(|e| e.model_name().to_string()),
    })
}

// --- Admin endpoints ---
async fn build_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let searcher = state.searcher.clone();
    let indexed = tokio::task::spawn_blocking(move || searcher.rebuild_index()).await.map_err(SearchError::from)??;
    tracing::info!(indexed, "index rebuilt");
    Ok(Json(serde_json::json!({ "indexed": indexed })))
}

async fn documents_handler(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<IngestBody>) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let papers = match body {
        IngestBody::Many(papers) => papers,
        IngestBody::One(paper) => vec![*paper],
    };
    if let Some(bad) = papers.iter().position(|p| p.title.trim().is_empty()) {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, format!("paper {bad} has no title")));
    }
    let papers: Vec<Paper> = papers.into_iter().map(|p| Paper { id: None, ..p }).collect();
    let searcher = state.searcher.clone();
    let ids = tokio::task::spawn_blocking(move || searcher.add_papers(&papers)).await.map_err(SearchError::from)??;
    Ok(Json(serde_json::json!({ "ids": ids })))
}

async fn clear_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<IndexStats>, ApiError> {
    authorize(&state, &headers)?;
    state.searcher.ir().clear();
    Ok(Json(state.searcher.ir().stats()))
}

async fn bm25_handler(State(state): State<AppState>, headers: HeaderMap, Json(params): Json<Bm25Params>) -> Result<Json<Bm25Params>, ApiError> {
    authorize(&state, &headers)?;
    if !params.k1.is_finite() || params.k1 < 0.0 || !(0.0..=1.0).contains(&params.b) {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "k1 must be >= 0 and b within [0, 1]"));
    }
    state.searcher.ir().set_parameters(params.k1, params.b);
    Ok(Json(state.searcher.ir().parameters()))
}

async fn backfill_handler(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<BackfillParams>) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let batch_size = params.batch_size.unwrap_or(papersift_core::config::DEFAULT_BACKFILL_BATCH);
    let saved = state.searcher.backfill_embeddings(batch_size, &state.shutdown.child_token()).await?;
    Ok(Json(serde_json::json!({ "saved": saved })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err(ApiError::new(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set")),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// A window of `text` around the first query term, with every term wrapped in
/// `<em>`. Falls back to the start of the text when no term occurs.
pub fn snippet(text: &str, terms: &[String]) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let pattern = term_pattern(terms);
    let first = pattern.as_ref().and_then(|re| re.find(text)).map(|m| m.start());
    let start = floor_char_boundary(text, first.map_or(0, |i| i.saturating_sub(SNIPPET_BEFORE)));
    let end = floor_char_boundary(text, (start + SNIPPET_LEN).min(text.len()));

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    match &pattern {
        Some(re) => out.push_str(&re.replace_all(&text[start..end], "<em>$0</em>")),
        None => out.push_str(&text[start..end]),
    }
    if end < text.len() {
        out.push_str("...");
    }
    Some(out)
}

fn term_pattern(terms: &[String]) -> Option<regex::Regex> {
    if terms.is_empty() {
        return None;
    }
    let alternation = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    regex::RegexBuilder::new(&format!(r"\b(?:{alternation})\b")).case_insensitive(true).build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(q: &str) -> Vec<String> { tokenize(q) }

    #[test]
    fn highlights_every_term_case_insensitively() {
        let s = snippet("Dense Retrieval beats sparse retrieval.", &terms("retrieval")).unwrap();
        assert_eq!(s, "Dense <em>Retrieval</em> beats sparse <em>retrieval</em>.");
    }

    #[test]
    fn whole_words_only() {
        let s = snippet("Retrievals and retrieval", &terms("retrieval")).unwrap();
        assert_eq!(s, "Retrievals and <em>retrieval</em>");
    }

    #[test]
    fn window_starts_near_first_hit() {
        let text = format!("{}graphs{}", "x ".repeat(200), " y".repeat(200));
        let s = snippet(&text, &terms("graphs")).unwrap();
        assert!(s.starts_with("..."));
        assert!(s.ends_with("..."));
        assert!(s.contains("<em>graphs</em>"));
    }

    #[test]
    fn no_hit_or_no_terms_gives_leading_text() {
        assert_eq!(snippet("Short abstract", &terms("proteins")).unwrap(), "Short abstract");
        assert_eq!(snippet("Short abstract", &[]).unwrap(), "Short abstract");
        assert!(snippet("   ", &terms("x")).is_none());
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "é".repeat(300);
        let s = snippet(&text, &[]).unwrap();
        assert!(s.ends_with("..."));
    }

    #[test]
    fn error_statuses() {
        let status = |e: SearchError| ApiError::from(e).status;
        assert_eq!(status(SearchError::EmptyQuery), StatusCode::BAD_REQUEST);
        assert_eq!(status(SearchError::UnknownAlgorithm("lsi".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(SearchError::PaperNotFound(3)), StatusCode::NOT_FOUND);
        assert_eq!(status(SearchError::EmbedderNotConfigured), StatusCode::SERVICE_UNAVAILABLE);
    }
}
