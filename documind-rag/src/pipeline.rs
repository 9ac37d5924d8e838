//! The DocuMind service context.
//!
//! [`DocuMind`] owns the five pipeline components and coordinates ingestion
//! (normalize → store → embed → index) and querying (retrieve → rerank →
//! compose). It is constructed explicitly through [`DocuMind::builder`] and
//! torn down with [`DocuMind::shutdown`].
//!
//! # Example
//!
//! ```rust,ignore
//! use documind_rag::{DocuMind, Document, HashingEmbeddingProvider, PipelineConfig};
//!
//! let documind = DocuMind::builder()
//!     .config(PipelineConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .build()?;
//!
//! let id = documind.ingest(Document::new("guide", text, "text/markdown")).await?;
//! let answer = documind.query("how are chunks cited?", 3).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::chunking::{BoundaryChunker, Chunker};
use crate::citation::CitationComposer;
use crate::config::PipelineConfig;
use crate::document::{Answer, Document, NormalizedDocument, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{DocuMindError, Result, Stage};
use crate::index::VectorIndex;
use crate::indexer::IndexingEngine;
use crate::inmemory::InMemoryVectorIndex;
use crate::normalize::IngestionNormalizer;
use crate::reranker::{Reranker, RerankingProvider};
use crate::retrieval::RetrievalEngine;
use crate::store::{DocumentStore, InMemoryDocumentStore};

/// The document intelligence service.
///
/// Safe to share across tasks behind an `Arc`; queries run in parallel, and
/// ingestions of different documents run in parallel while writes to the same
/// document are serialized.
pub struct DocuMind {
    config: PipelineConfig,
    normalizer: IngestionNormalizer,
    indexer: IndexingEngine,
    retrieval: RetrievalEngine,
    reranker: Option<Reranker>,
    composer: CitationComposer,
    store: Arc<dyn DocumentStore>,
    locks: Arc<DocumentLocks>,
    root: CancellationToken,
    closed: AtomicBool,
}

impl DocuMind {
    /// Create a new [`DocuMindBuilder`].
    pub fn builder() -> DocuMindBuilder {
        DocuMindBuilder::default()
    }

    /// Return a reference to the service configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest a document, replacing any previous version with the same id.
    ///
    /// Returns the document id.
    ///
    /// # Errors
    ///
    /// Any ingestion or indexing error; on failure the previously indexed
    /// version of the document (if any) stays queryable.
    pub async fn ingest(&self, document: Document) -> Result<String> {
        self.ingest_with_cancellation(document, &CancellationToken::new()).await
    }

    /// Like [`ingest`](Self::ingest), stopping early once `token` is cancelled.
    pub async fn ingest_with_cancellation(
        &self,
        document: Document,
        token: &CancellationToken,
    ) -> Result<String> {
        let token = self.scoped(token)?;
        token.check(Stage::Ingestion)?;

        let normalized = self.normalizer.normalize(document).inspect_err(|e| {
            error!(error = %e, "document rejected during ingestion");
        })?;
        let document_id = normalized.id().to_string();
        let chunks = normalized.chunks.clone();

        let lease = self.locks.acquire(&document_id).await;
        token.check(Stage::Ingestion)?;

        let previous = self.store.get(&document_id).await?;
        let pending = PendingWrite::new(self.store.clone(), &document_id, previous, lease);

        if let Err(e) = self.store.save(normalized).await {
            pending.roll_back().await;
            return Err(e);
        }
        if let Err(e) = self.indexer.index_document(&document_id, &chunks, &token).await {
            pending.roll_back().await;
            return Err(e);
        }
        pending.commit();

        info!(document.id = %document_id, chunk_count = chunks.len(), "ingested document");
        Ok(document_id)
    }

    /// Answer `query` from the `k` most relevant chunks.
    ///
    /// # Errors
    ///
    /// Any retrieval or citation error. [`DocuMindError::DanglingCitation`]
    /// means a document changed mid-query; the query can simply be retried.
    pub async fn query(&self, query: &str, k: usize) -> Result<Answer> {
        self.query_with_cancellation(query, k, &CancellationToken::new()).await
    }

    /// Like [`query`](Self::query), stopping early once `token` is cancelled.
    pub async fn query_with_cancellation(
        &self,
        query: &str,
        k: usize,
        token: &CancellationToken,
    ) -> Result<Answer> {
        let token = self.scoped(token)?;
        let results = self.search(query, k, &token).await?;
        let answer = self.composer.compose(query, &results, &token).await.inspect_err(|e| {
            error!(error = %e, "citation failed");
        })?;

        info!(
            result_count = results.len(),
            citation_count = answer.citations.len(),
            "query completed"
        );
        Ok(answer)
    }

    /// Return the ranked chunks for `query` without composing an answer.
    ///
    /// The results can be passed to [`compose`](Self::compose) later.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.retrieve_with_cancellation(query, k, &CancellationToken::new()).await
    }

    /// Like [`retrieve`](Self::retrieve), stopping early once `token` is cancelled.
    pub async fn retrieve_with_cancellation(
        &self,
        query: &str,
        k: usize,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        let token = self.scoped(token)?;
        let results = self.search(query, k, &token).await?;
        info!(result_count = results.len(), "retrieval completed");
        Ok(results)
    }

    /// Compose a cited answer from previously retrieved `results`.
    ///
    /// # Errors
    ///
    /// [`DocuMindError::DanglingCitation`] if a result's document was deleted
    /// or changed since it was retrieved.
    pub async fn compose(&self, query: &str, results: &[SearchResult]) -> Result<Answer> {
        let token = self.scoped(&CancellationToken::new())?;
        self.composer.compose(query, results, &token).await
    }

    /// Remove a document from the index and the store.
    ///
    /// Returns whether the document existed.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.ensure_open()?;
        let _lease = self.locks.acquire(document_id).await;

        let removed_entries = self.indexer.remove_document(document_id).await?;
        let existed = self.store.delete(document_id).await?;
        info!(document.id = %document_id, removed_entries, existed, "deleted document");
        Ok(existed || removed_entries > 0)
    }

    /// Stop the service: in-flight requests observe cancellation and every
    /// later call fails with [`DocuMindError::ServiceClosed`].
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.root.cancel();
            info!("documind shut down");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        let candidates = self.retrieval.retrieve(query, k, token).await?;
        match &self.reranker {
            Some(reranker) => reranker.rerank(query, candidates, token).await,
            None => Ok(candidates),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() { Err(DocuMindError::ServiceClosed) } else { Ok(()) }
    }

    /// A token cancelled by either the caller's `token` or [`shutdown`](Self::shutdown).
    fn scoped(&self, token: &CancellationToken) -> Result<CancellationToken> {
        self.ensure_open()?;
        let scoped = token.child_token();
        self.root.attach(&scoped);
        Ok(scoped)
    }
}

impl Drop for DocuMind {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Per-document write locks, created on demand and pruned once unused.
#[derive(Default)]
struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    async fn acquire(self: &Arc<Self>, document_id: &str) -> DocumentLease {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(document_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        DocumentLease {
            locks: Arc::clone(self),
            document_id: document_id.to_string(),
            guard: Some(guard),
        }
    }
}

struct DocumentLease {
    locks: Arc<DocumentLocks>,
    document_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Only the registry holds the lock once no writer owns or awaits it.
        if locks.get(&self.document_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.document_id);
        }
    }
}

/// A stored document version not yet backed by the index.
///
/// Unless committed, the previous version is put back (or the new one
/// removed). If the ingest future is dropped mid-write, `Drop`
/// spawns the restore and hands it the document lease, so no other writer
/// touches the document until the store matches the index again.
struct PendingWrite {
    store: Arc<dyn DocumentStore>,
    document_id: String,
    previous: Option<Arc<NormalizedDocument>>,
    lease: Option<DocumentLease>,
    armed: bool,
}

impl PendingWrite {
    fn new(
        store: Arc<dyn DocumentStore>,
        document_id: &str,
        previous: Option<Arc<NormalizedDocument>>,
        lease: DocumentLease,
    ) -> Self {
        Self {
            store,
            document_id: document_id.to_string(),
            previous,
            lease: Some(lease),
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }

    async fn roll_back(mut self) {
        restore_previous(self.store.as_ref(), &self.document_id, self.previous.clone()).await;
        self.armed = false;
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let document_id = std::mem::take(&mut self.document_id);
        let previous = self.previous.take();
        let lease = self.lease.take();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(
                    document.id = %document_id,
                    "ingestion dropped mid-write, restoring stored version"
                );
                runtime.spawn(async move {
                    restore_previous(store.as_ref(), &document_id, previous).await;
                    drop(lease);
                });
            }
            Err(_) => {
                error!(
                    document.id = %document_id,
                    "ingestion dropped outside a runtime, stored version not restored"
                );
            }
        }
    }
}

async fn restore_previous(
    store: &dyn DocumentStore,
    document_id: &str,
    previous: Option<Arc<NormalizedDocument>>,
) {
    let outcome = match previous {
        Some(doc) => store.save(doc.as_ref().clone()).await,
        None => store.delete(document_id).await.map(|_| ()),
    };
    if let Err(e) = outcome {
        warn!(document.id = %document_id, error = %e, "failed to roll back document store");
    }
}

/// Builder for constructing a [`DocuMind`] service.
///
/// Only the embedding provider is required. The vector index and document
/// store default to the in-memory backends, and the chunker to a
/// [`BoundaryChunker`] sized from the configuration.
///
/// # Example
///
/// ```rust,ignore
/// let documind = DocuMind::builder()
///     .config(PipelineConfig::builder().reranking(true).build()?)
///     .embedding_provider(Arc::new(embedder))
///     .reranking_provider(Arc::new(LexicalRerankingProvider))
///     .build()?;
/// ```
#[derive(Default)]
pub struct DocuMindBuilder {
    config: Option<PipelineConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    chunker: Option<Arc<dyn Chunker>>,
    reranking_provider: Option<Arc<dyn RerankingProvider>>,
}

impl DocuMindBuilder {
    /// Set the service configuration (defaults to [`PipelineConfig::default`]).
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector index backend.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    /// Set the document store backend.
    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the reranking provider; requires `capabilities.reranking`.
    pub fn reranking_provider(mut self, provider: Arc<dyn RerankingProvider>) -> Self {
        self.reranking_provider = Some(provider);
        self
    }

    /// Build the [`DocuMind`] service.
    ///
    /// # Errors
    ///
    /// Returns [`DocuMindError::Config`] if the configuration is invalid, the
    /// embedding provider is missing, or `capabilities.reranking` disagrees
    /// with whether a reranking provider was supplied.
    pub fn build(self) -> Result<DocuMind> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let provider = self
            .embedding_provider
            .ok_or_else(|| DocuMindError::Config("embedding_provider is required".to_string()))?;

        let reranker = match (config.capabilities.reranking, self.reranking_provider) {
            (true, Some(p)) => Some(Reranker::new(p, config.rerank_timeout())),
            (false, None) => None,
            (true, None) => {
                return Err(DocuMindError::Config(
                    "capabilities.reranking is enabled but no reranking provider was supplied"
                        .to_string(),
                ));
            }
            (false, Some(_)) => {
                return Err(DocuMindError::Config(
                    "a reranking provider was supplied but capabilities.reranking is disabled"
                        .to_string(),
                ));
            }
        };

        let index =
            self.vector_index.unwrap_or_else(|| Arc::new(InMemoryVectorIndex::new()));
        let store =
            self.document_store.unwrap_or_else(|| Arc::new(InMemoryDocumentStore::new()));
        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(BoundaryChunker::new(config.max_chunk_chars, config.overlap_chars))
        });

        info!(
            embedding_provider = provider.name(),
            model_version = %provider.model_version(),
            reranking = config.capabilities.reranking,
            "documind ready"
        );

        Ok(DocuMind {
            normalizer: IngestionNormalizer::new(chunker),
            indexer: IndexingEngine::new(
                provider.clone(),
                index.clone(),
                config.retry.clone(),
                config.provider_timeout(),
            ),
            retrieval: RetrievalEngine::new(
                provider,
                index,
                config.retry.clone(),
                config.provider_timeout(),
                config.similarity_threshold,
            ),
            reranker,
            composer: CitationComposer::new(
                store.clone(),
                config.max_citations,
                config.max_excerpt_chars,
            ),
            store,
            locks: Arc::new(DocumentLocks::default()),
            root: CancellationToken::new(),
            closed: AtomicBool::new(false),
            config,
        })
    }
}
