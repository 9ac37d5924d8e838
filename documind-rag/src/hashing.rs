//! Offline feature-hashing embedding provider.
//!
//! Produces deterministic dense vectors by hashing terms into fixed-dimension
//! buckets weighted by term frequency. Not as semantically rich as neural
//! embeddings, but always available and stable across runs, which makes it
//! the default for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::document::Embedding;
use crate::embedding::EmbeddingProvider;
use crate::error::ProviderError;
use crate::text::tokenize;

/// Default dimensionality of [`HashingEmbeddingProvider`] vectors.
pub const DEFAULT_HASHING_DIMENSIONS: usize = 256;

/// Deterministic embedding provider based on FNV-1a feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSIONS)
    }
}

impl HashingEmbeddingProvider {
    /// Create a provider producing vectors of `dimensions` components (at least 1).
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn hash_term(term: &str) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    /// Compute the L2-normalised vector for `text`. All zeros if no terms.
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_default() += 1.0;
        }

        let total = tokens.len() as f32;
        for (term, count) in tf {
            let h = Self::hash_term(term);
            let bucket = (h % self.dimensions as u64) as usize;
            // The top bit picks a sign so colliding terms tend to cancel rather than pile up.
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            let idf = 1.0 + (term.chars().count() as f32).ln();
            vector[bucket] += sign * (count / total) * idf;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        Ok(Embedding { vector: self.vectorize(text), model_version: self.model_version() })
    }

    fn model_version(&self) -> String {
        format!("fnv-hashing-v1-{}", self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
