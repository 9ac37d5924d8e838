//! Citation composer: extractive answers with verifiable source spans.
//!
//! For each ranked chunk the composer re-reads the owning document from the
//! [`DocumentStore`], checks that the chunk still resolves to the same text,
//! and quotes its most query-relevant sentence. A chunk whose document was
//! deleted or re-ingested with different content in the meantime produces
//! [`DocuMindError::DanglingCitation`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::document::{Answer, Citation, NormalizedDocument, SearchResult, Span};
use crate::error::{DocuMindError, Result, Stage};
use crate::store::DocumentStore;
use crate::text::{char_offset, sentence_spans, tokenize};

/// Answer text used when nothing relevant was retrieved.
pub const NO_ANSWER: &str = "No relevant passages were found in the indexed documents.";

/// Builds an [`Answer`] from ranked search results.
pub struct CitationComposer {
    store: Arc<dyn DocumentStore>,
    max_citations: usize,
    max_excerpt_chars: usize,
}

impl CitationComposer {
    /// Create a composer resolving spans against `store`.
    pub fn new(store: Arc<dyn DocumentStore>, max_citations: usize, max_excerpt_chars: usize) -> Self {
        Self { store, max_citations: max_citations.max(1), max_excerpt_chars: max_excerpt_chars.max(1) }
    }

    /// Compose an answer citing up to `max_citations` of `results`, in order.
    ///
    /// # Errors
    ///
    /// - [`DocuMindError::DanglingCitation`] if a cited chunk no longer
    ///   resolves in the document store; the caller should retry the query.
    /// - [`DocuMindError::Cancelled`] if `token` fires.
    pub async fn compose(
        &self,
        query: &str,
        results: &[SearchResult],
        token: &CancellationToken,
    ) -> Result<Answer> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        let mut documents: HashMap<&str, Arc<NormalizedDocument>> = HashMap::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut seen_spans: HashSet<(String, Span)> = HashSet::new();

        for result in results.iter().take(self.max_citations) {
            token.check(Stage::Citation)?;
            let entry = &result.entry;

            let document = match documents.get(entry.document_id.as_str()) {
                Some(doc) => doc.clone(),
                None => {
                    let doc = self
                        .store
                        .get(&entry.document_id)
                        .await?
                        .ok_or_else(|| dangling(result, "no longer exists"))?;
                    documents.insert(entry.document_id.as_str(), doc.clone());
                    doc
                }
            };

            let chunk = document
                .chunk(&entry.chunk_id)
                .ok_or_else(|| dangling(result, "is no longer part of the document"))?;
            if chunk.span != entry.span || entry.span.resolve(&document.text) != Some(entry.text.as_str())
            {
                warn!(
                    document.id = %entry.document_id,
                    chunk.id = %entry.chunk_id,
                    "document changed since retrieval"
                );
                return Err(dangling(result, "no longer resolves to the retrieved text"));
            }

            let Some(local) = self.select_excerpt(&entry.text, &query_terms) else {
                debug!(chunk.id = %entry.chunk_id, "chunk has no quotable sentence");
                continue;
            };
            let span = Span::new(entry.span.start + local.start, entry.span.start + local.end);
            if !seen_spans.insert((entry.document_id.clone(), span)) {
                continue;
            }
            let excerpt = span
                .resolve(&document.text)
                .ok_or_else(|| dangling(result, "excerpt falls outside the document"))?;

            citations.push(Citation {
                number: citations.len() + 1,
                document_id: entry.document_id.clone(),
                chunk_id: entry.chunk_id.clone(),
                span,
                excerpt: excerpt.to_string(),
            });
        }

        if citations.is_empty() {
            return Ok(Answer { text: NO_ANSWER.to_string(), citations });
        }

        let text = citations
            .iter()
            .map(|c| format!("{} [{}]", c.excerpt, c.number))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Answer { text, citations })
    }

    /// Pick the sentence of `chunk_text` sharing the most terms with the
    /// query (the first one on ties or when nothing overlaps), truncated to
    /// `max_excerpt_chars`. Returns a span relative to `chunk_text`.
    fn select_excerpt(&self, chunk_text: &str, query_terms: &HashSet<String>) -> Option<Span> {
        let sentences = sentence_spans(chunk_text);
        let mut best: Option<((usize, usize), usize)> = None;
        for &(start, end) in &sentences {
            let overlap = tokenize(&chunk_text[start..end])
                .iter()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter(|t| query_terms.contains(*t))
                .count();
            if best.is_none_or(|(_, top)| overlap > top) {
                best = Some(((start, end), overlap));
            }
        }

        let ((start, end), _) = best?;
        let sentence = &chunk_text[start..end];
        let cut = char_offset(sentence, self.max_excerpt_chars);
        let end = start + sentence[..cut].trim_end().len();
        (end > start).then(|| Span::new(start, end))
    }
}

fn dangling(result: &SearchResult, reason: &str) -> DocuMindError {
    DocuMindError::DanglingCitation {
        document_id: result.entry.document_id.clone(),
        chunk_id: result.entry.chunk_id.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{BoundaryChunker, Chunker};
    use crate::document::{Document, Embedding, IndexEntry};
    use crate::store::InMemoryDocumentStore;

    const TEXT: &str = "Vector search finds similar chunks. Reranking improves precision.\n\n\
                        Citations point back to source spans. They must always resolve.";

    async fn seeded() -> (Arc<InMemoryDocumentStore>, Vec<SearchResult>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let chunks = BoundaryChunker::new(70, 0).chunk("doc", TEXT);
        let results = chunks
            .iter()
            .map(|c| SearchResult {
                entry: IndexEntry {
                    chunk_id: c.id.clone(),
                    document_id: c.document_id.clone(),
                    sequence: c.sequence,
                    span: c.span,
                    text: c.text.clone(),
                    embedding: Embedding { vector: vec![1.0], model_version: "m".into() },
                },
                score: 1.0,
            })
            .rev()
            .collect();
        store
            .save(NormalizedDocument {
                document: Document::new("doc", TEXT, "text/plain"),
                text: TEXT.to_string(),
                chunks,
            })
            .await
            .unwrap();
        (store, results)
    }

    #[tokio::test]
    async fn citations_resolve_to_document_text() {
        let (store, results) = seeded().await;
        let composer = CitationComposer::new(store, 3, 300);
        let answer = composer
            .compose("must it always resolve", &results, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!answer.citations.is_empty());
        for (i, citation) in answer.citations.iter().enumerate() {
            assert_eq!(citation.number, i + 1);
            assert_eq!(citation.span.resolve(TEXT), Some(citation.excerpt.as_str()));
            assert!(answer.text.contains(&format!("{} [{}]", citation.excerpt, citation.number)));
        }
        assert_eq!(answer.citations[0].excerpt, "They must always resolve.");
    }

    #[tokio::test]
    async fn excerpts_are_truncated_on_char_boundaries() {
        let (store, results) = seeded().await;
        let composer = CitationComposer::new(store, 1, 6);
        let answer =
            composer.compose("citations", &results, &CancellationToken::new()).await.unwrap();
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].excerpt, "Citati");
    }

    #[tokio::test]
    async fn deleted_document_dangles() {
        let (store, results) = seeded().await;
        store.delete("doc").await.unwrap();
        let composer = CitationComposer::new(store, 3, 300);
        let err = composer.compose("vector", &results, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DocuMindError::DanglingCitation { .. }));
        assert_eq!(err.stage(), Stage::Citation);
    }

    #[tokio::test]
    async fn changed_document_dangles() {
        let (store, results) = seeded().await;
        let changed = TEXT.replace("Citations", "References");
        let chunks = BoundaryChunker::new(70, 0).chunk("doc", &changed);
        store
            .save(NormalizedDocument {
                document: Document::new("doc", changed.clone(), "text/plain"),
                text: changed,
                chunks,
            })
            .await
            .unwrap();

        let composer = CitationComposer::new(store, 3, 300);
        let err = composer.compose("vector", &results, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DocuMindError::DanglingCitation { .. }));
    }

    #[tokio::test]
    async fn no_results_gives_fixed_answer() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let composer = CitationComposer::new(store, 3, 300);
        let answer = composer.compose("anything", &[], &CancellationToken::new()).await.unwrap();
        assert_eq!(answer.text, NO_ANSWER);
        assert!(answer.citations.is_empty());
    }
}
