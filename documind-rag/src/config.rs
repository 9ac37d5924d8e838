//! Configuration for the document intelligence pipeline.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocuMindError, Result};

/// Prefix of every environment variable read by [`PipelineConfig::from_env`].
pub const ENV_PREFIX: &str = "DOCUMIND_";

/// Retry policy for transient embedding provider failures.
///
/// The delay before retry `n` (1-based) is `initial_backoff * 2^(n-1)`,
/// capped at `max_backoff`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 200, max_backoff_ms: 5_000 }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Optional pipeline capabilities, resolved once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether a reranking provider takes part in queries.
    pub reranking: bool,
}

/// Configuration parameters for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum chunk size in characters.
    pub max_chunk_chars: usize,
    /// Characters of preceding text embedded alongside each chunk.
    pub overlap_chars: usize,
    /// Default number of results for a query.
    pub top_k: usize,
    /// Minimum similarity score kept by retrieval.
    pub similarity_threshold: f32,
    /// Retry policy for embedding calls during ingestion.
    pub retry: RetryPolicy,
    /// Timeout for a single embedding provider call, in milliseconds.
    pub provider_timeout_ms: u64,
    /// Timeout for each reranking provider call, in milliseconds.
    pub rerank_timeout_ms: u64,
    /// Maximum number of citations attached to an answer.
    pub max_citations: usize,
    /// Maximum excerpt length in characters.
    pub max_excerpt_chars: usize,
    /// Optional capabilities.
    pub capabilities: Capabilities,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1_000,
            overlap_chars: 200,
            top_k: 5,
            similarity_threshold: 0.0,
            retry: RetryPolicy::default(),
            provider_timeout_ms: 10_000,
            rerank_timeout_ms: 5_000,
            max_citations: 3,
            max_excerpt_chars: 300,
            capabilities: Capabilities::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for constructing a [`PipelineConfig`].
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Timeout applied to each embedding provider call.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Timeout applied to each reranking provider call.
    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    /// Load configuration from `DOCUMIND_*` environment variables on top of
    /// the defaults, then validate it.
    ///
    /// # Errors
    ///
    /// Returns [`DocuMindError::Config`] if a variable is set but cannot be
    /// parsed, or if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        let c = &mut builder.config;

        read_var(&lookup, "MAX_CHUNK_CHARS", &mut c.max_chunk_chars)?;
        read_var(&lookup, "OVERLAP_CHARS", &mut c.overlap_chars)?;
        read_var(&lookup, "TOP_K", &mut c.top_k)?;
        read_var(&lookup, "SIMILARITY_THRESHOLD", &mut c.similarity_threshold)?;
        read_var(&lookup, "RETRY_MAX_ATTEMPTS", &mut c.retry.max_attempts)?;
        read_var(&lookup, "RETRY_INITIAL_BACKOFF_MS", &mut c.retry.initial_backoff_ms)?;
        read_var(&lookup, "RETRY_MAX_BACKOFF_MS", &mut c.retry.max_backoff_ms)?;
        read_var(&lookup, "PROVIDER_TIMEOUT_MS", &mut c.provider_timeout_ms)?;
        read_var(&lookup, "RERANK_TIMEOUT_MS", &mut c.rerank_timeout_ms)?;
        read_var(&lookup, "MAX_CITATIONS", &mut c.max_citations)?;
        read_var(&lookup, "MAX_EXCERPT_CHARS", &mut c.max_excerpt_chars)?;
        read_var(&lookup, "RERANKING", &mut c.capabilities.reranking)?;

        builder.build()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`DocuMindError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_chars == 0 {
            return Err(config_error("max_chunk_chars must be greater than zero"));
        }
        if self.overlap_chars >= self.max_chunk_chars {
            return Err(DocuMindError::Config(format!(
                "overlap_chars ({}) must be less than max_chunk_chars ({})",
                self.overlap_chars, self.max_chunk_chars
            )));
        }
        if self.top_k == 0 {
            return Err(config_error("top_k must be greater than zero"));
        }
        if !self.similarity_threshold.is_finite() || !(-1.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(config_error("similarity_threshold must be within [-1.0, 1.0]"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(config_error("retry.max_backoff_ms must not be below retry.initial_backoff_ms"));
        }
        if self.provider_timeout_ms == 0 || self.rerank_timeout_ms == 0 {
            return Err(config_error("timeouts must be greater than zero"));
        }
        if self.max_citations == 0 {
            return Err(config_error("max_citations must be greater than zero"));
        }
        if self.max_excerpt_chars == 0 {
            return Err(config_error("max_excerpt_chars must be greater than zero"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> DocuMindError {
    DocuMindError::Config(message.to_string())
}

fn read_var<F, T>(lookup: &F, name: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    if let Some(raw) = lookup(&key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| DocuMindError::Config(format!("invalid value '{raw}' for {key}: {e}")))?;
    }
    Ok(())
}

/// Builder for constructing a validated [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn max_chunk_chars(mut self, chars: usize) -> Self {
        self.config.max_chunk_chars = chars;
        self
    }

    /// Set the overlap window in characters.
    pub fn overlap_chars(mut self, chars: usize) -> Self {
        self.config.overlap_chars = chars;
        self
    }

    /// Set the default number of query results.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity kept by retrieval.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the embedding retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the per-call embedding provider timeout.
    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the reranking timeout.
    pub fn rerank_timeout(mut self, timeout: Duration) -> Self {
        self.config.rerank_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the maximum number of citations per answer.
    pub fn max_citations(mut self, n: usize) -> Self {
        self.config.max_citations = n;
        self
    }

    /// Set the maximum excerpt length in characters.
    pub fn max_excerpt_chars(mut self, chars: usize) -> Self {
        self.config.max_excerpt_chars = chars;
        self
    }

    /// Enable or disable the reranking capability.
    pub fn reranking(mut self, enabled: bool) -> Self {
        self.config.capabilities.reranking = enabled;
        self
    }

    /// Build the [`PipelineConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`DocuMindError::Config`] if validation fails.
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let err = PipelineConfig::builder().max_chunk_chars(100).overlap_chars(100).build();
        assert!(matches!(err, Err(DocuMindError::Config(_))));
    }

    #[test]
    fn zero_attempts_rejected() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        assert!(PipelineConfig::builder().retry(policy).build().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy { max_attempts: 10, initial_backoff_ms: 100, max_backoff_ms: 350 };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn reads_prefixed_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DOCUMIND_MAX_CHUNK_CHARS", "400"),
            ("DOCUMIND_OVERLAP_CHARS", " 40 "),
            ("DOCUMIND_RERANKING", "true"),
            ("DOCUMIND_RETRY_MAX_ATTEMPTS", "5"),
        ]);
        let config =
            PipelineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_chunk_chars, 400);
        assert_eq!(config.overlap_chars, 40);
        assert!(config.capabilities.reranking);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.top_k, PipelineConfig::default().top_k);
    }

    #[test]
    fn unparsable_variable_is_an_error() {
        let err = PipelineConfig::from_lookup(|k| {
            (k == "DOCUMIND_TOP_K").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("DOCUMIND_TOP_K"));
    }
}
