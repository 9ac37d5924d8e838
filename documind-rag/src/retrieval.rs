//! Retrieval engine: embed the query and search the vector index.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::cancel::CancellationToken;
use crate::config::RetryPolicy;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{DocuMindError, ProviderError, Result, Stage};
use crate::index::VectorIndex;
use crate::retry::{CallError, call_with_retry};

/// Finds the chunks nearest to a query.
///
/// The query is embedded with the same provider used at ingestion. If the
/// provider's model version no longer matches the index, the search is
/// refused rather than comparing vectors from different models.
pub struct RetrievalEngine {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    retry: RetryPolicy,
    timeout: Duration,
    similarity_threshold: f32,
}

impl RetrievalEngine {
    /// Create an engine over `provider` and `index`.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        retry: RetryPolicy,
        timeout: Duration,
        similarity_threshold: f32,
    ) -> Self {
        Self { provider, index, retry, timeout, similarity_threshold }
    }

    /// Return up to `k` entries ordered by descending similarity, ties broken
    /// by ascending chunk sequence index.
    ///
    /// An empty index, `k == 0` or a blank query yields an empty result.
    ///
    /// # Errors
    ///
    /// - [`DocuMindError::RetrievalTimeout`] if the last query embedding attempt
    ///   timed out.
    /// - [`DocuMindError::EmbeddingProvider`] if the provider fails otherwise.
    ///   Transient failures are retried per the engine's [`RetryPolicy`] first.
    /// - [`DocuMindError::ModelVersionMismatch`] if the index was built with another model.
    /// - [`DocuMindError::IndexRead`] if the search itself fails.
    /// - [`DocuMindError::Cancelled`] if `token` fires first.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        token.check(Stage::Retrieval)?;
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Some(indexed_version) = self.index.model_version().await? else {
            debug!("retrieval against empty index");
            return Ok(Vec::new());
        };

        let embed = || self.provider.embed(query);
        let embedding = call_with_retry(&self.retry, self.timeout, token, "query", embed)
            .await
            .map_err(|e| match e {
                CallError::Cancelled => DocuMindError::Cancelled { stage: Stage::Retrieval },
                CallError::Failed { error: ProviderError::Timeout(timeout), .. } => {
                    error!(
                        timeout_ms = timeout.as_millis() as u64,
                        "query embedding timed out"
                    );
                    DocuMindError::RetrievalTimeout { timeout }
                }
                CallError::Failed { error, attempts } => {
                    error!(error = %error, "query embedding failed");
                    DocuMindError::EmbeddingProvider {
                        stage: Stage::Retrieval,
                        provider: self.provider.name().to_string(),
                        attempts,
                        source: error,
                    }
                }
            })?;

        if embedding.model_version != indexed_version {
            error!(
                indexed = %indexed_version,
                query = %embedding.model_version,
                "embedding model changed since ingestion"
            );
            return Err(DocuMindError::ModelVersionMismatch {
                indexed: indexed_version,
                query: embedding.model_version,
            });
        }

        let mut results = self.index.search(&embedding.vector, k).await.map_err(|e| match e {
            DocuMindError::IndexRead { .. } => e,
            other => DocuMindError::IndexRead {
                backend: "vector index".to_string(),
                message: other.to_string(),
            },
        })?;

        let threshold = self.similarity_threshold;
        results.retain(|r| r.score >= threshold);
        results.truncate(k);
        debug!(k, result_count = results.len(), "retrieval completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Embedding, IndexEntry, Span};
    use crate::inmemory::InMemoryVectorIndex;
    use crate::hashing::HashingEmbeddingProvider;

    async fn seeded_index(provider: &HashingEmbeddingProvider) -> Arc<InMemoryVectorIndex> {
        let index = Arc::new(InMemoryVectorIndex::new());
        let texts = ["rust ownership and borrowing", "python garbage collection", "rust lifetimes"];
        let entries: Vec<IndexEntry> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| IndexEntry {
                chunk_id: format!("d#{i}"),
                document_id: "d".into(),
                sequence: i,
                span: Span::new(i * 40, i * 40 + text.len()),
                text: text.to_string(),
                embedding: Embedding {
                    vector: provider.vectorize(text),
                    model_version: provider.model_version(),
                },
            })
            .collect();
        index.upsert(&entries).await.unwrap();
        index
    }

    fn engine(
        provider: HashingEmbeddingProvider,
        index: Arc<InMemoryVectorIndex>,
        threshold: f32,
    ) -> RetrievalEngine {
        RetrievalEngine::new(
            Arc::new(provider),
            index,
            RetryPolicy::default(),
            Duration::from_secs(1),
            threshold,
        )
    }

    #[tokio::test]
    async fn returns_at_most_k_sorted() {
        let provider = HashingEmbeddingProvider::new(64);
        let index = seeded_index(&provider).await;
        let engine = engine(provider, index, -1.0);

        let results =
            engine.retrieve("rust ownership", 2, &CancellationToken::new()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.chunk_id, "d#0");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn blank_query_and_zero_k_are_empty() {
        let provider = HashingEmbeddingProvider::new(64);
        let index = seeded_index(&provider).await;
        let engine = engine(provider, index, 0.0);
        let token = CancellationToken::new();
        assert!(engine.retrieve("   ", 3, &token).await.unwrap().is_empty());
        assert!(engine.retrieve("rust", 0, &token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_change_is_detected() {
        let index = seeded_index(&HashingEmbeddingProvider::new(64)).await;
        let engine = engine(HashingEmbeddingProvider::new(128), index, 0.0);
        let err = engine.retrieve("rust", 2, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DocuMindError::ModelVersionMismatch { .. }));
    }

    #[tokio::test]
    async fn threshold_filters_weak_matches() {
        let provider = HashingEmbeddingProvider::new(64);
        let index = seeded_index(&provider).await;
        let engine = engine(provider, index, 0.99);
        let results =
            engine.retrieve("rust lifetimes", 3, &CancellationToken::new()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.chunk_id, "d#2");
    }
}
