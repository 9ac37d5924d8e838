//! Document intelligence pipeline with cited answers.
//!
//! This crate provides:
//! - Ingestion: content-type aware text extraction and boundary-aware chunking
//! - Indexing: chunk embeddings with retries, written atomically per document
//! - Retrieval: cosine nearest-neighbour search with model version checks
//! - Reranking: optional, fail-open reordering of retrieval candidates
//! - Citation: extractive answers whose spans resolve in the document store
//!
//! Everything is wired together by the [`DocuMind`] service context.
//!
//! # Feature flags
//!
//! - `openai` — [`OpenAIEmbeddingProvider`] backed by the OpenAI embeddings API

pub mod cancel;
pub mod chunking;
pub mod citation;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod index;
pub mod indexer;
pub mod inmemory;
pub mod normalize;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pipeline;
pub mod reranker;
pub mod retrieval;
pub mod store;

mod retry;
mod text;

pub use cancel::CancellationToken;
pub use chunking::{BoundaryChunker, Chunker, FixedSizeChunker};
pub use citation::{CitationComposer, NO_ANSWER};
pub use config::{Capabilities, PipelineConfig, PipelineConfigBuilder, RetryPolicy};
pub use document::{
    Answer, Chunk, Citation, Document, Embedding, IndexEntry, NormalizedDocument, SearchResult,
    Span,
};
pub use embedding::EmbeddingProvider;
pub use error::{DocuMindError, ProviderError, Result, Stage};
pub use hashing::HashingEmbeddingProvider;
pub use index::VectorIndex;
pub use indexer::IndexingEngine;
pub use inmemory::InMemoryVectorIndex;
pub use normalize::{ContentKind, IngestionNormalizer};
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
pub use pipeline::{DocuMind, DocuMindBuilder};
pub use reranker::{LexicalRerankingProvider, Reranker, RerankingProvider};
pub use retrieval::RetrievalEngine;
pub use store::{DocumentStore, InMemoryDocumentStore};
