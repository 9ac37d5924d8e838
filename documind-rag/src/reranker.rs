//! Reranking of retrieval candidates.
//!
//! A [`RerankingProvider`] scores one (query, chunk text) pair at a time; the
//! [`Reranker`] applies it to a candidate set and reorders it. Reranking
//! never adds or drops candidates, and it fails open: if the provider errors,
//! times out, or returns a non-finite score, the retrieval order is kept.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::document::SearchResult;
use crate::error::{DocuMindError, ProviderError, Result, Stage};
use crate::retry::{CallError, call_once};
use crate::text::tokenize;

/// A higher-precision relevance scorer for a query and a chunk.
///
/// Implementations can use cross-encoder models, LLM-based scoring, or
/// lexical strategies.
#[async_trait]
pub trait RerankingProvider: Send + Sync {
    /// Score how well `chunk_text` answers `query`; higher is better.
    async fn score(&self, query: &str, chunk_text: &str) -> std::result::Result<f32, ProviderError>;

    /// Short provider name used in logs.
    fn name(&self) -> &str;
}

/// Lexical scorer based on weighted query-term coverage and phrase matches.
///
/// - coverage: share of the query's term weight present in the chunk, where
///   longer terms weigh more (`1 + ln(len)`)
/// - phrase bonus: up to `0.5` for query bigrams that appear adjacently
/// - density: up to `0.1` for the share of chunk terms that are query terms
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalRerankingProvider;

impl LexicalRerankingProvider {
    /// Score synchronously; exposed for callers that do not need the async trait.
    pub fn score_text(&self, query: &str, chunk_text: &str) -> f32 {
        let query_terms = tokenize(query);
        let chunk_terms = tokenize(chunk_text);
        if query_terms.is_empty() || chunk_terms.is_empty() {
            return 0.0;
        }

        let chunk_set: HashSet<&str> = chunk_terms.iter().map(String::as_str).collect();
        let unique_query: HashSet<&str> = query_terms.iter().map(String::as_str).collect();

        let weight = |t: &str| 1.0 + (t.chars().count() as f32).ln();
        let total: f32 = unique_query.iter().map(|t| weight(*t)).sum();
        let covered: f32 =
            unique_query.iter().filter(|t| chunk_set.contains(**t)).map(|t| weight(*t)).sum();
        let coverage = covered / total;

        let chunk_bigrams: HashSet<(&str, &str)> =
            chunk_terms.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();
        let query_bigrams: Vec<(&str, &str)> =
            query_terms.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();
        let phrase = if query_bigrams.is_empty() {
            0.0
        } else {
            let hits = query_bigrams.iter().filter(|b| chunk_bigrams.contains(*b)).count();
            0.5 * hits as f32 / query_bigrams.len() as f32
        };

        let matched = chunk_terms.iter().filter(|t| unique_query.contains(t.as_str())).count();
        let density = 0.1 * matched as f32 / chunk_terms.len() as f32;

        coverage + phrase + density
    }
}

#[async_trait]
impl RerankingProvider for LexicalRerankingProvider {
    async fn score(&self, query: &str, chunk_text: &str) -> std::result::Result<f32, ProviderError> {
        Ok(self.score_text(query, chunk_text))
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

/// Reorders retrieval candidates with a [`RerankingProvider`].
pub struct Reranker {
    provider: Arc<dyn RerankingProvider>,
    timeout: Duration,
}

impl Reranker {
    /// Create a reranker; `timeout` bounds each individual `score` call.
    pub fn new(provider: Arc<dyn RerankingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Rerank `candidates` for `query`.
    ///
    /// On success the candidates carry their new scores, sorted descending
    /// (ties keep retrieval order). On provider failure the input is returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Only [`DocuMindError::Cancelled`]; provider failures never surface.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        if candidates.len() < 2 {
            token.check(Stage::Reranking)?;
            return Ok(candidates);
        }

        let scoring = candidates
            .iter()
            .map(|c| call_once(self.timeout, token, self.provider.score(query, &c.entry.text)));
        let scores = match try_join_all(scoring).await {
            Ok(scores) => scores,
            Err(CallError::Cancelled) => return Err(DocuMindError::Cancelled { stage: Stage::Reranking }),
            Err(CallError::Failed { error, .. }) => {
                warn!(
                    reranker = self.provider.name(),
                    error = %error,
                    "reranking provider failed, keeping retrieval order"
                );
                return Ok(candidates);
            }
        };

        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            warn!(
                reranker = self.provider.name(),
                score = %bad,
                "reranking provider returned a non-finite score, keeping retrieval order"
            );
            return Ok(candidates);
        }

        let mut reranked: Vec<SearchResult> = candidates
            .into_iter()
            .zip(scores)
            .map(|(mut result, score)| {
                result.score = score;
                result
            })
            .collect();
        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(reranker = self.provider.name(), candidate_count = reranked.len(), "reranked");
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Embedding, IndexEntry, Span};

    fn candidate(sequence: usize, text: &str, score: f32) -> SearchResult {
        SearchResult {
            entry: IndexEntry {
                chunk_id: format!("d#{sequence}"),
                document_id: "d".into(),
                sequence,
                span: Span::new(0, text.len()),
                text: text.into(),
                embedding: Embedding { vector: vec![1.0], model_version: "m".into() },
            },
            score,
        }
    }

    struct Failing;

    #[async_trait]
    impl RerankingProvider for Failing {
        async fn score(&self, _query: &str, _text: &str) -> std::result::Result<f32, ProviderError> {
            Err(ProviderError::Unavailable("offline".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct NotANumber;

    #[async_trait]
    impl RerankingProvider for NotANumber {
        async fn score(&self, _query: &str, _text: &str) -> std::result::Result<f32, ProviderError> {
            Ok(f32::NAN)
        }

        fn name(&self) -> &str {
            "nan"
        }
    }

    /// Answers instantly except for chunks containing "slow", which hang.
    struct Stalling;

    #[async_trait]
    impl RerankingProvider for Stalling {
        async fn score(&self, _query: &str, text: &str) -> std::result::Result<f32, ProviderError> {
            if text.contains("slow") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(1.0)
        }

        fn name(&self) -> &str {
            "stalling"
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.entry.chunk_id.as_str()).collect()
    }

    #[test]
    fn lexical_scores_reward_coverage_and_phrases() {
        let p = LexicalRerankingProvider;
        let exact = p.score_text("vector database", "a vector database stores embeddings");
        let split = p.score_text("vector database", "database of every vector");
        let none = p.score_text("vector database", "completely unrelated words");
        assert!(exact > split);
        assert!(split > none);
        assert_eq!(none, 0.0);
        assert_eq!(p.score_text("", "anything"), 0.0);
    }

    #[tokio::test]
    async fn reorders_by_new_score() {
        let reranker = Reranker::new(Arc::new(LexicalRerankingProvider), Duration::from_secs(1));
        let candidates = vec![
            candidate(0, "nothing relevant here", 0.9),
            candidate(1, "citations link answers to sources", 0.5),
        ];
        let out = reranker
            .rerank("citations sources", candidates, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&out), vec!["d#1", "d#0"]);
    }

    #[tokio::test]
    async fn fails_open_on_provider_error() {
        let reranker = Reranker::new(Arc::new(Failing), Duration::from_secs(1));
        let candidates = vec![candidate(0, "a b", 0.9), candidate(1, "c d", 0.5)];
        let out = reranker.rerank("q", candidates.clone(), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, candidates);
    }

    #[tokio::test]
    async fn fails_open_on_non_finite_scores() {
        let reranker = Reranker::new(Arc::new(NotANumber), Duration::from_secs(1));
        let candidates = vec![candidate(0, "a b", 0.9), candidate(1, "c d", 0.5)];
        let out = reranker.rerank("q", candidates.clone(), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, candidates);
    }

    #[tokio::test(start_paused = true)]
    async fn a_stalled_score_call_times_out_and_fails_open() {
        let reranker = Reranker::new(Arc::new(Stalling), Duration::from_millis(50));
        let candidates =
            vec![candidate(0, "fast", 0.9), candidate(1, "slow", 0.5), candidate(2, "fast", 0.1)];
        let out = reranker.rerank("q", candidates.clone(), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, candidates);
    }

    #[tokio::test]
    async fn cancellation_is_not_swallowed() {
        let reranker = Reranker::new(Arc::new(LexicalRerankingProvider), Duration::from_secs(1));
        let token = CancellationToken::new();
        token.cancel();
        let err = reranker
            .rerank("q", vec![candidate(0, "a", 0.1), candidate(1, "b", 0.2)], &token)
            .await
            .unwrap_err();
        assert!(matches!(err, DocuMindError::Cancelled { stage: Stage::Reranking }));
    }
}
