//! Error types for the `documind-rag` crate.
//!
//! Every [`DocuMindError`] names the pipeline [`Stage`] that produced it, and
//! the stage is part of the rendered message so that user-visible failures
//! always say where the pipeline stopped.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Format detection, text extraction and chunking.
    Ingestion,
    /// Embedding computation and vector index writes.
    Indexing,
    /// Query embedding and nearest-neighbour search.
    Retrieval,
    /// Secondary relevance scoring.
    Reranking,
    /// Answer composition and citation resolution.
    Citation,
    /// Configuration loading and validation.
    Configuration,
    /// The service context itself.
    Service,
}

impl Stage {
    /// Short lowercase name used in log fields and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingestion => "ingestion",
            Stage::Indexing => "indexing",
            Stage::Retrieval => "retrieval",
            Stage::Reranking => "reranking",
            Stage::Citation => "citation",
            Stage::Configuration => "configuration",
            Stage::Service => "service",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an external provider (embedding or reranking).
///
/// Providers do not know which pipeline stage called them; the owning
/// component maps these into [`DocuMindError`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The call did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The provider could not be reached or is temporarily overloaded.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request (bad input, bad credentials).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The provider answered with something that could not be used.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Unavailable(_))
    }
}

/// Errors that can occur in the document intelligence pipeline.
#[derive(Debug, Error)]
pub enum DocuMindError {
    /// The content type is unknown or the bytes cannot be decoded as that type.
    #[error("[ingestion] unsupported format '{content_type}': {reason}")]
    UnsupportedFormat {
        /// The content type supplied with the upload.
        content_type: String,
        /// Why the content could not be parsed.
        reason: String,
    },

    /// The document parsed but contained no extractable text.
    #[error("[ingestion] document '{document_id}' contains no extractable text")]
    EmptyDocument {
        /// The offending document.
        document_id: String,
    },

    /// The embedding provider failed, possibly after exhausting the retry budget.
    #[error("[{stage}] embedding provider '{provider}' failed after {attempts} attempt(s): {source}")]
    EmbeddingProvider {
        /// Indexing for ingestion, retrieval for query embedding.
        stage: Stage,
        /// Name of the provider.
        provider: String,
        /// How many calls were made before giving up.
        attempts: u32,
        /// The last provider failure.
        #[source]
        source: ProviderError,
    },

    /// The vector index rejected a write. Fatal for the current ingestion.
    #[error("[indexing] vector index '{backend}' write failed: {message}")]
    IndexWrite {
        /// The index backend.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector index failed to serve a search.
    #[error("[retrieval] vector index '{backend}' search failed: {message}")]
    IndexRead {
        /// The index backend.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The query embedding comes from a different model than the indexed one.
    #[error(
        "[retrieval] model version mismatch: index holds '{indexed}', provider produced '{query}'; reindex required"
    )]
    ModelVersionMismatch {
        /// Model version recorded by the index.
        indexed: String,
        /// Model version of the query embedding.
        query: String,
    },

    /// The query embedding call exceeded its timeout.
    #[error("[retrieval] query embedding timed out after {timeout:?}")]
    RetrievalTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A ranked chunk no longer resolves to a stored document span.
    #[error("[citation] dangling citation: chunk '{chunk_id}' of document '{document_id}' {reason}")]
    DanglingCitation {
        /// The referenced document.
        document_id: String,
        /// The referenced chunk.
        chunk_id: String,
        /// What failed to resolve.
        reason: String,
    },

    /// The document store failed.
    #[error("[{stage}] document store '{backend}' failed: {message}")]
    DocumentStore {
        /// The stage that called the store.
        stage: Stage,
        /// The store backend.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The request was cancelled before the stage finished.
    #[error("[{stage}] cancelled")]
    Cancelled {
        /// The stage that observed the cancellation.
        stage: Stage,
    },

    /// A configuration validation error.
    #[error("[configuration] {0}")]
    Config(String),

    /// The service context has been shut down.
    #[error("[service] service context is shut down")]
    ServiceClosed,
}

impl DocuMindError {
    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            DocuMindError::UnsupportedFormat { .. } | DocuMindError::EmptyDocument { .. } => {
                Stage::Ingestion
            }
            DocuMindError::EmbeddingProvider { stage, .. }
            | DocuMindError::DocumentStore { stage, .. }
            | DocuMindError::Cancelled { stage } => *stage,
            DocuMindError::IndexWrite { .. } => Stage::Indexing,
            DocuMindError::IndexRead { .. }
            | DocuMindError::ModelVersionMismatch { .. }
            | DocuMindError::RetrievalTimeout { .. } => Stage::Retrieval,
            DocuMindError::DanglingCitation { .. } => Stage::Citation,
            DocuMindError::Config(_) => Stage::Configuration,
            DocuMindError::ServiceClosed => Stage::Service,
        }
    }

    /// Whether the caller may retry the whole request and expect a different outcome.
    ///
    /// Provider failures count only when the last failure was transient; a
    /// rejected request will be rejected again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DocuMindError::EmbeddingProvider { source, .. } => source.is_transient(),
            DocuMindError::RetrievalTimeout { .. } | DocuMindError::DanglingCitation { .. } => true,
            _ => false,
        }
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, DocuMindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_stage() {
        let err = DocuMindError::EmbeddingProvider {
            stage: Stage::Indexing,
            provider: "hashing".into(),
            attempts: 3,
            source: ProviderError::Timeout(Duration::from_millis(50)),
        };
        assert!(err.to_string().starts_with("[indexing]"));
        assert_eq!(err.stage(), Stage::Indexing);
        assert!(err.is_retryable());

        let err = DocuMindError::DanglingCitation {
            document_id: "d".into(),
            chunk_id: "d#0".into(),
            reason: "no longer exists".into(),
        };
        assert!(err.to_string().starts_with("[citation]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn structural_errors_are_not_retryable() {
        let err = DocuMindError::ModelVersionMismatch { indexed: "a".into(), query: "b".into() };
        assert_eq!(err.stage(), Stage::Retrieval);
        assert!(!err.is_retryable());
        assert!(!DocuMindError::IndexWrite { backend: "x".into(), message: "y".into() }.is_retryable());
    }

    #[test]
    fn transient_provider_errors() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProviderError::Unavailable("503".into()).is_transient());
        assert!(!ProviderError::Rejected("401".into()).is_transient());
        assert!(!ProviderError::InvalidResponse("empty".into()).is_transient());
    }
}
