use anyhow::Result;
use clap::Parser;
use papersift_core::config::EmbeddingConfig;
use papersift_core::embed::HttpEmbedder;
use papersift_core::ir::IrEngine;
use papersift_core::persist::PaperStore;
use papersift_core::search::Searcher;
use server::{build_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Store directory
    #[arg(long, default_value = "data/papers.db")]
    db: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Build the lexical index before accepting requests
    #[arg(long, default_value_t = false)]
    warm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let store = PaperStore::open(&args.db)?;
    let mut searcher = Searcher::new(store, Arc::new(IrEngine::new()));
    match EmbeddingConfig::from_env() {
        Some(config) => {
            tracing::info!(model = %config.model, dimension = config.dimension, "semantic search enabled");
            searcher = searcher.with_embedder(Arc::new(HttpEmbedder::new(config)?));
        }
        None => tracing::warn!("EMBEDDING_MODEL not set, semantic search disabled"),
    }
    if args.warm && searcher.store().paper_count() > 0 {
        let n = searcher.rebuild_index()?;
        tracing::info!(papers = n, "lexical index warmed");
    }

    let state = AppState::new(Arc::new(searcher), std::env::var("ADMIN_TOKEN").ok());
    let shutdown = state.shutdown.clone();
    let store = state.searcher.store().clone();
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    store.flush()?;
    Ok(())
}
