use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// DocuMind: ask questions about local documents and get cited answers.
///
/// Pipeline settings are read from `DOCUMIND_*` environment variables (a
/// `.env` file in the working directory is loaded first).
#[derive(Debug, Parser)]
#[command(name = "documind", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest files and answer a question with citations.
    Ask {
        /// Files to ingest before answering.
        #[arg(short, long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// The question to answer.
        #[arg(short, long)]
        query: String,

        /// Number of chunks to retrieve (defaults to the configured top_k).
        #[arg(short)]
        k: Option<usize>,

        /// Rerank retrieval candidates with the lexical reranker.
        #[arg(long)]
        rerank: bool,

        /// Embedding provider.
        #[arg(long, value_enum, default_value_t = Embedder::Hashing)]
        embedder: Embedder,

        /// Print only the ranked chunks instead of an answer.
        #[arg(long)]
        retrieve_only: bool,
    },

    /// Show how a file is split into chunks.
    Chunk {
        /// File to normalize and chunk.
        file: PathBuf,
    },

    /// Print the effective pipeline configuration.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Embedder {
    /// Offline feature hashing; deterministic, no network.
    Hashing,
    /// OpenAI embeddings (`OPENAI_API_KEY`, requires the `openai` feature).
    Openai,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ask_with_defaults() {
        let cli = Cli::try_parse_from(["documind", "ask", "-f", "a.md", "b.txt", "-q", "why?"])
            .unwrap();
        match cli.command {
            Command::Ask { files, query, k, rerank, embedder, retrieve_only } => {
                assert_eq!(files, vec![PathBuf::from("a.md"), PathBuf::from("b.txt")]);
                assert_eq!(query, "why?");
                assert_eq!(k, None);
                assert!(!rerank);
                assert!(!retrieve_only);
                assert_eq!(embedder, Embedder::Hashing);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(!cli.log_json);
    }

    #[test]
    fn ask_requires_files() {
        assert!(Cli::try_parse_from(["documind", "ask", "-q", "why?"]).is_err());
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["documind", "config", "--log-json"]).unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Config));
    }
}
