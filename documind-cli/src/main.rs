//! # DocuMind CLI (`documind`)
//!
//! | Command | Description |
//! |---------|-------------|
//! | `documind ask -f <files..> -q "<question>"` | Ingest files and print a cited answer |
//! | `documind chunk <file>` | Print the chunks a file is split into |
//! | `documind config` | Print the effective pipeline configuration |
//!
//! Output is JSON on stdout; logs go to stderr (`RUST_LOG`, `--log-json`).

mod cli;
mod telemetry;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use documind_rag::{
    BoundaryChunker, DocuMind, Document, EmbeddingProvider, HashingEmbeddingProvider,
    IngestionNormalizer, LexicalRerankingProvider, PipelineConfig,
};
use tracing::{info, warn};

use crate::cli::{Cli, Command, Embedder};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; configuration may come from the real environment.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init(cli.log_json);
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let config = PipelineConfig::from_env().context("invalid DOCUMIND_* configuration")?;

    match cli.command {
        Command::Ask { files, query, k, rerank, embedder, retrieve_only } => {
            let k = k.unwrap_or(config.top_k);
            let documind = build_service(config, embedder, rerank)?;

            for file in &files {
                let document = read_document(file).await?;
                documind
                    .ingest(document)
                    .await
                    .with_context(|| format!("failed to ingest {}", file.display()))?;
            }

            let output = tokio::select! {
                out = run_query(&documind, &query, k, retrieve_only) => out?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted");
                    documind.shutdown();
                    bail!("interrupted");
                }
            };
            documind.shutdown();
            println!("{output}");
        }
        Command::Chunk { file } => {
            let normalizer = IngestionNormalizer::new(Arc::new(BoundaryChunker::new(
                config.max_chunk_chars,
                config.overlap_chars,
            )));
            let normalized = normalizer.normalize(read_document(&file).await?)?;
            println!("{}", serde_json::to_string_pretty(&normalized.chunks)?);
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_query(documind: &DocuMind, query: &str, k: usize, retrieve_only: bool) -> Result<String> {
    if retrieve_only {
        let results = documind.retrieve(query, k).await?;
        return Ok(serde_json::to_string_pretty(&results)?);
    }
    let answer = documind.query(query, k).await?;
    Ok(serde_json::to_string_pretty(&answer)?)
}

fn build_service(mut config: PipelineConfig, embedder: Embedder, rerank: bool) -> Result<DocuMind> {
    config.capabilities.reranking |= rerank;
    let provider = embedding_provider(embedder)?;

    let mut builder = DocuMind::builder().embedding_provider(provider);
    if config.capabilities.reranking {
        builder = builder.reranking_provider(Arc::new(LexicalRerankingProvider));
    }
    Ok(builder.config(config).build()?)
}

fn embedding_provider(embedder: Embedder) -> Result<Arc<dyn EmbeddingProvider>> {
    match embedder {
        Embedder::Hashing => Ok(Arc::new(HashingEmbeddingProvider::default())),
        #[cfg(feature = "openai")]
        Embedder::Openai => Ok(Arc::new(documind_rag::OpenAIEmbeddingProvider::from_env()?)),
        #[cfg(not(feature = "openai"))]
        Embedder::Openai => bail!("this build of documind does not include the openai feature"),
    }
}

async fn read_document(path: &Path) -> Result<Document> {
    let content =
        tokio::fs::read(path).await.with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Document::new(path.display().to_string(), content, content_type_for(path)))
}

/// Guess a content type from the file extension; unknown extensions are plain text.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("md" | "markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_follow_extensions() {
        assert_eq!(content_type_for(Path::new("notes/README.MD")), "text/markdown");
        assert_eq!(content_type_for(Path::new("data.csv")), "text/csv");
        assert_eq!(content_type_for(Path::new("page.htm")), "text/html");
        assert_eq!(content_type_for(Path::new("dump.json")), "application/json");
        assert_eq!(content_type_for(Path::new("LICENSE")), "text/plain");
    }

    #[test]
    fn rerank_flag_enables_the_capability() {
        let service = build_service(PipelineConfig::default(), Embedder::Hashing, true).unwrap();
        assert!(service.config().capabilities.reranking);
    }
}
