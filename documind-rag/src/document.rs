//! Data types for documents, chunks, index entries, and citations.

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw uploaded document.
///
/// The identifier is immutable once assigned. Ownership passes to the
/// ingestion normalizer, which produces a [`NormalizedDocument`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// Raw uploaded bytes.
    pub content: Vec<u8>,
    /// MIME content type, e.g. `text/plain; charset=utf-8`.
    pub content_type: String,
    /// When the document was uploaded.
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    /// Create a document with an explicit identifier, stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            content_type: content_type.into(),
            uploaded_at: Utc::now(),
        }
    }

    /// Create a document with a freshly generated identifier.
    pub fn with_generated_id(content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), content, content_type)
    }
}

/// A half-open byte range `[start, end)` into a document's extracted text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The span as a `Range` for slicing.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Resolve the span against `text`, returning `None` if it is out of
    /// bounds or does not fall on character boundaries.
    pub fn resolve<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.start > self.end {
            return None;
        }
        text.get(self.range())
    }
}

/// Build the deterministic identifier of a chunk.
pub fn chunk_id(document_id: &str, sequence: usize) -> String {
    format!("{document_id}#{sequence}")
}

/// A non-overlapping, offset-addressable segment of one document's text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Deterministic identifier, `{document_id}#{sequence}`.
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Position of this chunk within the document, starting at 0.
    pub sequence: usize,
    /// Byte range of this chunk in the extracted text.
    pub span: Span,
    /// The text covered by `span`.
    pub text: String,
    /// Text immediately preceding `span`, bounded by the overlap window.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
}

impl Chunk {
    /// Text handed to the embedding provider: the overlap context followed by the chunk.
    pub fn embedding_text(&self) -> String {
        if self.context.is_empty() {
            self.text.clone()
        } else {
            format!("{}{}", self.context, self.text)
        }
    }
}

/// A document after text extraction and chunking; the unit persisted by the
/// [`DocumentStore`](crate::store::DocumentStore).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedDocument {
    /// The original upload.
    pub document: Document,
    /// Clean extracted text. Chunk spans index into this string.
    pub text: String,
    /// Ordered chunks tiling `text`.
    pub chunks: Vec<Chunk>,
}

impl NormalizedDocument {
    /// The document identifier.
    pub fn id(&self) -> &str {
        &self.document.id
    }

    /// Look up a chunk by its identifier.
    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == chunk_id)
    }
}

/// A vector embedding with the model version that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    /// The embedding values.
    pub vector: Vec<f32>,
    /// Identifier of the model (and version) that produced `vector`.
    pub model_version: String,
}

/// A chunk stored in the vector index together with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The indexed chunk's identifier. Upserts are keyed on this.
    pub chunk_id: String,
    /// The owning document.
    pub document_id: String,
    /// The chunk's sequence index, used for deterministic tie-breaks.
    pub sequence: usize,
    /// The chunk's span in the document text.
    pub span: Span,
    /// The chunk text at indexing time.
    pub text: String,
    /// The chunk's embedding.
    pub embedding: Embedding,
}

/// A retrieved [`IndexEntry`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved entry.
    pub entry: IndexEntry,
    /// Relevance score (higher is more relevant).
    pub score: f32,
}

/// A pointer from answer text back to a verifiable source span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The `[n]` marker used in the answer text, starting at 1.
    pub number: usize,
    /// The cited document.
    pub document_id: String,
    /// The chunk the excerpt was taken from.
    pub chunk_id: String,
    /// Byte range of `excerpt` in the document text.
    pub span: Span,
    /// The quoted text.
    pub excerpt: String,
}

/// A composed answer with its citations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// Answer text containing `[n]` citation markers.
    pub text: String,
    /// One citation per chunk used in `text`.
    pub citations: Vec<Citation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_resolves_only_on_char_boundaries() {
        let text = "héllo";
        assert_eq!(Span::new(0, 1).resolve(text), Some("h"));
        assert_eq!(Span::new(0, 2).resolve(text), None);
        assert_eq!(Span::new(0, 3).resolve(text), Some("hé"));
        assert_eq!(Span::new(4, 99).resolve(text), None);
        assert_eq!(Span::new(3, 1).resolve(text), None);
    }

    #[test]
    fn embedding_text_prepends_context() {
        let chunk = Chunk {
            id: chunk_id("doc", 1),
            document_id: "doc".into(),
            sequence: 1,
            span: Span::new(5, 10),
            text: "world".into(),
            context: "lo, ".into(),
        };
        assert_eq!(chunk.id, "doc#1");
        assert_eq!(chunk.embedding_text(), "lo, world");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Document::with_generated_id("x", "text/plain");
        let b = Document::with_generated_id("x", "text/plain");
        assert_ne!(a.id, b.id);
    }
}
