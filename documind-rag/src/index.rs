//! Vector index trait for storing and searching chunk embeddings.

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::document::{IndexEntry, SearchResult};
use crate::error::Result;

/// A storage backend for [`IndexEntry`] values with similarity search.
///
/// Entries are keyed on their chunk identifier, so upserting the same chunk
/// twice leaves a single entry. The index records the embedding model
/// version and dimensionality of its contents and rejects writes that
/// disagree with them.
///
/// Implementations must allow searches to run concurrently with writes, and
/// a single `upsert` or `replace_document` call must become visible to
/// readers all at once or not at all.
///
/// # Example
///
/// ```rust,ignore
/// use documind_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// index.upsert(&entries).await?;
/// let results = index.search(&query_vector, 5).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries by chunk identifier.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Make `entries` the complete set of entries for `document_id`.
    ///
    /// The default implementation deletes and then upserts, which is not
    /// atomic; backends that can swap in one step should override it.
    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        self.delete(document_id).await?;
        self.upsert(entries).await
    }

    /// Search for the `k` entries most similar to `vector`.
    ///
    /// Returns results ordered by [`rank_order`].
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Delete every entry of a document, returning how many were removed.
    async fn delete(&self, document_id: &str) -> Result<usize>;

    /// Model version of the indexed embeddings, `None` while the index is empty.
    async fn model_version(&self) -> Result<Option<String>>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize>;

    /// Whether the index holds no entries.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Deterministic result order: descending score, then ascending chunk
/// sequence index, document id and chunk id.
pub fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.entry.sequence.cmp(&b.entry.sequence))
        .then_with(|| a.entry.document_id.cmp(&b.entry.document_id))
        .then_with(|| a.entry.chunk_id.cmp(&b.entry.chunk_id))
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
