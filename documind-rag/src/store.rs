//! Document store trait and its in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::NormalizedDocument;
use crate::error::Result;

/// Persistent home of normalized documents and their chunks.
///
/// The citation composer resolves spans against what this store returns, so
/// a document removed here makes every outstanding citation into it dangle.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document by its identifier.
    async fn save(&self, document: NormalizedDocument) -> Result<()>;

    /// Fetch a document, `None` if it does not exist.
    async fn get(&self, document_id: &str) -> Result<Option<Arc<NormalizedDocument>>>;

    /// Remove a document, returning whether it existed.
    async fn delete(&self, document_id: &str) -> Result<bool>;
}

/// A [`DocumentStore`] held in process memory.
///
/// Documents are shared out as `Arc`s so readers never copy document text.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Arc<NormalizedDocument>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether no documents are stored.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save(&self, document: NormalizedDocument) -> Result<()> {
        let id = document.id().to_string();
        self.documents.write().await.insert(id, Arc::new(document));
        Ok(())
    }

    async fn get(&self, document_id: &str) -> Result<Option<Arc<NormalizedDocument>>> {
        Ok(self.documents.read().await.get(document_id).cloned())
    }

    async fn delete(&self, document_id: &str) -> Result<bool> {
        Ok(self.documents.write().await.remove(document_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn normalized(id: &str, text: &str) -> NormalizedDocument {
        NormalizedDocument {
            document: Document::new(id, text, "text/plain"),
            text: text.to_string(),
            chunks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_get_delete() {
        let store = InMemoryDocumentStore::new();
        store.save(normalized("a", "one")).await.unwrap();
        store.save(normalized("a", "two")).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("a").await.unwrap().unwrap().text, "two");

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
