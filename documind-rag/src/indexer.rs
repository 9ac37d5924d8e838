//! Embedding and indexing engine: chunk → embed (with retries) → index.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{error, info};

use crate::cancel::CancellationToken;
use crate::config::RetryPolicy;
use crate::document::{Chunk, IndexEntry};
use crate::embedding::EmbeddingProvider;
use crate::error::{DocuMindError, ProviderError, Result, Stage};
use crate::index::VectorIndex;
use crate::retry::{CallError, call_with_retry};

/// Number of embedding calls kept in flight per document.
const EMBED_CONCURRENCY: usize = 4;

/// Computes chunk embeddings and writes them into the vector index.
///
/// All embeddings of a document are computed before anything is written, and
/// the write replaces the document's previous entries in one call, so a
/// failed or cancelled ingestion leaves the index as it was.
pub struct IndexingEngine {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl IndexingEngine {
    /// Create an engine over `provider` and `index`.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self { provider, index, retry, timeout }
    }

    /// Embed every chunk, retrying transient provider failures.
    ///
    /// # Errors
    ///
    /// - [`DocuMindError::EmbeddingProvider`] once the retry budget is exhausted
    ///   or on a permanent provider failure.
    /// - [`DocuMindError::Cancelled`] if `token` fires first.
    pub async fn embed_chunks(
        &self,
        chunks: &[Chunk],
        token: &CancellationToken,
    ) -> Result<Vec<IndexEntry>> {
        let pending: Vec<_> = chunks.iter().map(|chunk| self.embed_one(chunk, token)).collect();
        stream::iter(pending)
            .buffered(EMBED_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn embed_one(&self, chunk: &Chunk, token: &CancellationToken) -> Result<IndexEntry> {
        let text = chunk.embedding_text();
        let embedding = call_with_retry(&self.retry, self.timeout, token, &chunk.id, || {
            self.provider.embed(&text)
        })
        .await
        .map_err(|e| self.map_call_error(e))?;

        let expected_dims = self.provider.dimensions();
        if embedding.vector.len() != expected_dims {
            return Err(DocuMindError::EmbeddingProvider {
                stage: Stage::Indexing,
                provider: self.provider.name().to_string(),
                attempts: 1,
                source: ProviderError::InvalidResponse(format!(
                    "expected {expected_dims} dimensions, got {}",
                    embedding.vector.len()
                )),
            });
        }

        Ok(IndexEntry {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            sequence: chunk.sequence,
            span: chunk.span,
            text: chunk.text.clone(),
            embedding,
        })
    }

    /// Embed `chunks` and make them the complete index content for `document_id`.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Embedding errors as for [`embed_chunks`](Self::embed_chunks), and
    /// [`DocuMindError::IndexWrite`] if the index rejects the entries.
    pub async fn index_document(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        token: &CancellationToken,
    ) -> Result<usize> {
        let entries = self.embed_chunks(chunks, token).await.inspect_err(|e| {
            error!(document.id = %document_id, error = %e, "embedding failed during ingestion");
        })?;
        token.check(Stage::Indexing)?;

        self.index.replace_document(document_id, &entries).await.map_err(|e| {
            error!(document.id = %document_id, error = %e, "index write failed during ingestion");
            match e {
                DocuMindError::IndexWrite { .. } => e,
                other => DocuMindError::IndexWrite {
                    backend: "vector index".to_string(),
                    message: other.to_string(),
                },
            }
        })?;

        info!(document.id = %document_id, entry_count = entries.len(), "indexed document");
        Ok(entries.len())
    }

    /// Remove every entry of a document from the index.
    pub async fn remove_document(&self, document_id: &str) -> Result<usize> {
        self.index.delete(document_id).await
    }

    fn map_call_error(&self, error: CallError) -> DocuMindError {
        match error {
            CallError::Cancelled => DocuMindError::Cancelled { stage: Stage::Indexing },
            CallError::Failed { error, attempts } => DocuMindError::EmbeddingProvider {
                stage: Stage::Indexing,
                provider: self.provider.name().to_string(),
                attempts,
                source: error,
            },
        }
    }
}
