use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use papersift_core::config::{EmbeddingConfig, DEFAULT_BACKFILL_BATCH};
use papersift_core::embed::HttpEmbedder;
use papersift_core::ir::IrEngine;
use papersift_core::persist::PaperStore;
use papersift_core::search::Searcher;
use papersift_core::Paper;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Load papers into the store and maintain their embeddings", long_about = None)]
struct Cli {
    /// Store directory
    #[arg(long, global = true, default_value = "data/papers.db")]
    db: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert papers from JSON/JSONL files or a directory of them
    Ingest {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// Source assigned to records that carry none
        #[arg(long)]
        source: Option<String>,
    },
    /// Embed papers that have no vector for the configured model
    Backfill {
        #[arg(long, default_value_t = DEFAULT_BACKFILL_BATCH)]
        batch_size: usize,
        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<usize>,
    },
    /// Print store and index statistics as JSON
    Stats {
        /// Also build the lexical index and report its statistics
        #[arg(long, default_value_t = false)]
        with_index: bool,
    },
}

#[derive(Debug, Default, Serialize)]
struct IngestReport {
    files: usize,
    upserted: usize,
    skipped: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let store = PaperStore::open(&cli.db).with_context(|| format!("opening store at {}", cli.db.display()))?;

    match cli.command {
        Commands::Ingest { input, source } => {
            let report = ingest(&store, &input, source.as_deref())?;
            store.flush()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Backfill { batch_size, max_batches } => backfill(store, batch_size, max_batches).await?,
        Commands::Stats { with_index } => stats(store, with_index)?,
    }
    Ok(())
}

fn input_files(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")))
        .collect();
    files.sort();
    files
}

fn ingest(store: &PaperStore, input: &Path, source: Option<&str>) -> Result<IngestReport> {
    let files = input_files(input);
    if files.is_empty() {
        bail!("no .json or .jsonl files under {}", input.display());
    }
    let mut report = IngestReport { files: files.len(), ..Default::default() };
    for file in files {
        let records = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") { read_jsonl(&file)? } else { read_json(&file)? };
        for (n, value) in records.into_iter().enumerate() {
            match to_paper(value, source) {
                Ok(paper) => {
                    store.upsert_paper(&paper)?;
                    report.upserted += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %file.display(), record = n, error = %e, "skipping record");
                    report.skipped += 1;
                }
            }
        }
    }
    tracing::info!(upserted = report.upserted, skipped = report.skipped, "ingest complete");
    Ok(report)
}

fn read_jsonl(file: &Path) -> Result<Vec<serde_json::Value>> {
    let reader = BufReader::new(File::open(file)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        out.push(serde_json::from_str(&line).with_context(|| format!("parsing {}", file.display()))?);
    }
    Ok(out)
}

fn read_json(file: &Path) -> Result<Vec<serde_json::Value>> {
    let json: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(file)?))?;
    Ok(match json {
        serde_json::Value::Array(arr) => arr,
        v @ serde_json::Value::Object(_) => vec![v],
        _ => Vec::new(),
    })
}

fn to_paper(mut value: serde_json::Value, source: Option<&str>) -> Result<Paper> {
    if let (Some(obj), Some(source)) = (value.as_object_mut(), source) {
        obj.entry("source").or_insert_with(|| source.into());
    }
    let mut paper: Paper = serde_json::from_value(value)?;
    // ids are assigned by the store
    paper.id = None;
    if paper.title.trim().is_empty() {
        bail!("record has no title");
    }
    Ok(paper)
}

async fn backfill(store: PaperStore, batch_size: usize, max_batches: Option<usize>) -> Result<()> {
    let Some(config) = EmbeddingConfig::from_env() else {
        bail!("EMBEDDING_MODEL is not set");
    };
    let searcher = Searcher::new(store, Arc::new(IrEngine::new())).with_embedder(Arc::new(HttpEmbedder::new(config)?));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current paper");
            on_signal.cancel();
        }
    });

    let mut total = 0;
    let mut batches = 0;
    while !cancel.is_cancelled() && max_batches.map_or(true, |m| batches < m) {
        let saved = searcher.backfill_embeddings(batch_size, &cancel).await?;
        batches += 1;
        total += saved;
        if saved == 0 {
            break;
        }
    }
    searcher.store().flush()?;
    tracing::info!(total, batches, "backfill done");
    println!("{}", serde_json::json!({ "saved": total, "batches": batches }));
    Ok(())
}

fn stats(store: PaperStore, with_index: bool) -> Result<()> {
    let mut out = serde_json::json!({
        "papers": store.paper_count(),
        "embeddings": store.embedding_count(),
    });
    if with_index {
        let searcher = Searcher::new(store, Arc::new(IrEngine::new()));
        searcher.rebuild_index()?;
        out["index"] = serde_json::to_value(searcher.ir().stats())?;
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_is_filled_in() {
        let v = serde_json::json!({ "source_id": "2401.0001", "title": "Sparse retrieval", "abstract": "BM25" });
        let p = to_paper(v, Some("arxiv")).unwrap();
        assert_eq!(p.source, "arxiv");
        assert_eq!(p.abstract_text, "BM25");
    }

    #[test]
    fn explicit_source_wins_and_ids_are_dropped() {
        let v = serde_json::json!({ "id": 7, "source": "acl", "source_id": "x", "title": "T" });
        let p = to_paper(v, Some("arxiv")).unwrap();
        assert_eq!(p.source, "acl");
        assert_eq!(p.id, None);
    }

    #[test]
    fn untitled_records_are_rejected() {
        let v = serde_json::json!({ "source": "acl", "source_id": "x", "title": "  " });
        assert!(to_paper(v, None).is_err());
    }

    #[test]
    fn jsonl_ingest_dedups_by_source_key() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("papers.jsonl");
        std::fs::write(
            &file,
            "{\"source_id\":\"1\",\"title\":\"A\"}\n\n{\"source_id\":\"1\",\"title\":\"A v2\"}\n{\"source_id\":\"2\"}\n",
        )
        .unwrap();
        let store = PaperStore::temporary().unwrap();
        let report = ingest(&store, dir.path(), Some("arxiv")).unwrap();
        assert_eq!((report.files, report.upserted, report.skipped), (1, 2, 1));
        assert_eq!(store.paper_count(), 1);
    }
}
