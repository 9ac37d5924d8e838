//! The embedding provider seam.

use async_trait::async_trait;

use crate::document::Embedding;
use crate::error::ProviderError;

/// Turns text into dense vectors.
///
/// The same provider embeds chunks at ingestion and queries at retrieval.
/// Each [`Embedding`] is stamped with the model version that produced it, and
/// the index refuses to compare vectors across versions.
///
/// Providers make a single attempt per call; the indexing and retrieval
/// engines own timeouts and retries.
///
/// # Example
///
/// ```rust,ignore
/// use documind_rag::{EmbeddingProvider, HashingEmbeddingProvider};
///
/// let provider = HashingEmbeddingProvider::default();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.vector.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one piece of text.
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;

    /// Version of the model currently answering, e.g. `openai:text-embedding-3-small:1536`.
    fn model_version(&self) -> String;

    /// Length of the vectors this provider returns.
    fn dimensions(&self) -> usize;

    /// Short name for logs and errors.
    fn name(&self) -> &str;
}
