//! In-memory vector index using cosine similarity.
//!
//! This module provides [`InMemoryVectorIndex`], a vector index backed by
//! `HashMap`s protected by a `tokio::sync::RwLock`. Searches share the read
//! lock; every write takes the write lock once, so a batch of entries becomes
//! visible atomically. It is suitable for development, testing, and
//! small-scale use cases.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{IndexEntry, SearchResult};
use crate::error::{DocuMindError, Result};
use crate::index::{VectorIndex, cosine_similarity, rank_order};

const BACKEND: &str = "in-memory";

#[derive(Debug, Default)]
struct IndexState {
    model_version: Option<String>,
    dimensions: Option<usize>,
    entries: HashMap<String, IndexEntry>,
    by_document: HashMap<String, BTreeSet<String>>,
}

impl IndexState {
    /// Check a batch against the recorded model and against itself.
    /// `replacing` names a document whose entries are about to be dropped.
    fn validate(&self, entries: &[IndexEntry], replacing: Option<&str>) -> Result<()> {
        let remaining = self.entries.len()
            - replacing.and_then(|d| self.by_document.get(d)).map_or(0, BTreeSet::len);
        let (mut version, mut dims) = if remaining > 0 {
            (self.model_version.clone(), self.dimensions)
        } else {
            (None, None)
        };

        for entry in entries {
            let entry_version = &entry.embedding.model_version;
            let entry_dims = entry.embedding.vector.len();
            if entry_dims == 0 {
                return Err(write_error(format!("chunk '{}' has an empty embedding", entry.chunk_id)));
            }
            match &version {
                Some(v) if v != entry_version => {
                    return Err(write_error(format!(
                        "chunk '{}' embedded with '{entry_version}' but index holds '{v}'",
                        entry.chunk_id
                    )));
                }
                Some(_) => {}
                None => version = Some(entry_version.clone()),
            }
            match dims {
                Some(d) if d != entry_dims => {
                    return Err(write_error(format!(
                        "chunk '{}' has {entry_dims} dimensions, index expects {d}",
                        entry.chunk_id
                    )));
                }
                Some(_) => {}
                None => dims = Some(entry_dims),
            }
            if let Some(existing) = self.entries.get(&entry.chunk_id) {
                if existing.document_id != entry.document_id {
                    return Err(write_error(format!(
                        "chunk '{}' already belongs to document '{}'",
                        entry.chunk_id, existing.document_id
                    )));
                }
            }
        }
        Ok(())
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        let Some(ids) = self.by_document.remove(document_id) else { return 0 };
        for id in &ids {
            self.entries.remove(id);
        }
        self.reset_if_empty();
        ids.len()
    }

    fn insert(&mut self, entries: &[IndexEntry]) {
        for entry in entries {
            if self.model_version.is_none() {
                self.model_version = Some(entry.embedding.model_version.clone());
                self.dimensions = Some(entry.embedding.vector.len());
            }
            self.by_document
                .entry(entry.document_id.clone())
                .or_default()
                .insert(entry.chunk_id.clone());
            self.entries.insert(entry.chunk_id.clone(), entry.clone());
        }
    }

    fn reset_if_empty(&mut self) {
        if self.entries.is_empty() {
            self.model_version = None;
            self.dimensions = None;
        }
    }
}

fn write_error(message: String) -> DocuMindError {
    DocuMindError::IndexWrite { backend: BACKEND.to_string(), message }
}

/// An in-memory vector index using cosine similarity for search.
///
/// # Example
///
/// ```rust,ignore
/// use documind_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// assert!(index.is_empty().await?);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    state: RwLock<IndexState>,
}

impl InMemoryVectorIndex {
    /// Create a new empty in-memory vector index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk identifiers stored for a document, in ascending order.
    pub async fn chunk_ids(&self, document_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .by_document
            .get(document_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut state = self.state.write().await;
        state.validate(entries, None)?;
        state.insert(entries);
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        if let Some(stray) = entries.iter().find(|e| e.document_id != document_id) {
            return Err(write_error(format!(
                "entry '{}' belongs to '{}', not '{document_id}'",
                stray.chunk_id, stray.document_id
            )));
        }
        let mut state = self.state.write().await;
        state.validate(entries, Some(document_id))?;
        state.remove_document(document_id);
        state.insert(entries);
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        if k == 0 || state.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dims) = state.dimensions {
            if dims != vector.len() {
                return Err(DocuMindError::IndexRead {
                    backend: BACKEND.to_string(),
                    message: format!("query has {} dimensions, index holds {dims}", vector.len()),
                });
            }
        }

        let mut scored: Vec<SearchResult> = state
            .entries
            .values()
            .map(|entry| SearchResult {
                score: cosine_similarity(&entry.embedding.vector, vector),
                entry: entry.clone(),
            })
            .collect();

        scored.sort_by(rank_order);
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        Ok(state.remove_document(document_id))
    }

    async fn model_version(&self) -> Result<Option<String>> {
        Ok(self.state.read().await.model_version.clone())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.entries.len())
    }
}
