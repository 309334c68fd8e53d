//! Embedding service abstractions for the playbook.
//!
//! This module provides the trait and implementations for embedding
//! generation. Embeddings are dense vector representations of bullet bodies
//! and queries, compared by cosine similarity for dedup and ranking.
//!
//! # Providers
//!
//! - [`HashingEmbedding`] - Local and deterministic, no network
//! - `RemoteEmbedding` - OpenAI-compatible `/embeddings` endpoint (requires
//!   the `http-providers` feature)
//!
//! The provider is chosen once from [`EmbeddingProvider`](crate::config::EmbeddingProvider)
//! by [`create_embedding_service`]. Nothing falls back from one to the other
//! at runtime.
//!
//! # Example
//!
//! ```rust
//! use ace_playbook::embedding::{EmbeddingService, HashingEmbedding};
//!
//! let service = HashingEmbedding::new(64, 7);
//! let batch = service.embed_batch(&["retry with backoff"]).unwrap();
//! assert_eq!(batch.vectors[0].len(), 64);
//! ```

mod hashing;
#[cfg(feature = "http-providers")]
pub mod remote;

pub use hashing::HashingEmbedding;
#[cfg(feature = "http-providers")]
pub use remote::RemoteEmbedding;

use crate::config::{Config, EmbeddingProvider};
use crate::error::{PlaybookError, Result};
use crate::types::Embedding;

/// Vectors returned for one batch, with the model that produced them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbeddingBatch {
    /// One vector per input text, in input order.
    pub vectors: Vec<Embedding>,
    /// Model identifier reported by the provider.
    pub model: String,
}

impl EmbeddingBatch {
    /// Fails unless the batch holds exactly `expected` vectors.
    ///
    /// Providers never hand back partial results; a short or long batch is
    /// an embedding error.
    pub fn ensure_count(&self, expected: usize) -> Result<()> {
        if self.vectors.len() != expected {
            return Err(PlaybookError::embedding(format!(
                "provider returned {} vectors for {} inputs",
                self.vectors.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Fails unless the batch holds exactly `expected` non-empty vectors of
    /// one common length with finite components.
    pub fn ensure_uniform(&self, expected: usize) -> Result<()> {
        self.ensure_count(expected)?;
        let Some(dimension) = self.vectors.first().map(Vec::len) else {
            return Ok(());
        };
        for (index, vector) in self.vectors.iter().enumerate() {
            if vector.is_empty() || vector.len() != dimension {
                return Err(PlaybookError::embedding(format!(
                    "vector {index} has length {}, expected {dimension}",
                    vector.len()
                )));
            }
            if !vector.iter().all(|v| v.is_finite()) {
                return Err(PlaybookError::embedding(format!(
                    "vector {index} has non-finite components"
                )));
            }
        }
        Ok(())
    }
}

/// Embedding service trait for generating vector representations of text.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Implementing a Custom Provider
///
/// ```rust
/// use ace_playbook::embedding::{EmbeddingBatch, EmbeddingService};
/// use ace_playbook::Result;
///
/// struct Constant;
///
/// impl EmbeddingService for Constant {
///     fn embed_batch(&self, texts: &[&str]) -> Result<EmbeddingBatch> {
///         Ok(EmbeddingBatch {
///             vectors: texts.iter().map(|_| vec![1.0, 0.0]).collect(),
///             model: self.model().to_string(),
///         })
///     }
///
///     fn model(&self) -> &str {
///         "constant"
///     }
/// }
/// ```
pub trait EmbeddingService: Send + Sync {
    /// Generates embeddings for multiple texts in one call.
    ///
    /// An empty input returns an empty batch without contacting any
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns `PlaybookError::Embedding` if the provider fails or returns
    /// a batch whose size differs from the input.
    fn embed_batch(&self, texts: &[&str]) -> Result<EmbeddingBatch>;

    /// Generates an embedding for a single text.
    fn embed(&self, text: &str) -> Result<Embedding> {
        let batch = self.embed_batch(&[text])?;
        batch.ensure_count(1)?;
        Ok(batch.vectors.into_iter().next().unwrap_or_default())
    }

    /// Model identifier used for new vectors.
    fn model(&self) -> &str;
}

/// Creates an embedding service based on the configuration.
///
/// # Errors
///
/// Returns a `Config` error if the remote provider is selected but the
/// `http-providers` feature is disabled.
pub fn create_embedding_service(config: &Config) -> Result<Box<dyn EmbeddingService>> {
    match &config.embedding_provider {
        EmbeddingProvider::Hashing(hashing) => Ok(Box::new(HashingEmbedding::new(
            hashing.dimension,
            hashing.seed,
        ))),

        #[cfg(feature = "http-providers")]
        EmbeddingProvider::Remote(remote) => Ok(Box::new(RemoteEmbedding::new(
            remote.clone(),
            config.retry.clone(),
        ))),

        #[cfg(not(feature = "http-providers"))]
        EmbeddingProvider::Remote(_) => Err(PlaybookError::config(
            "remote embeddings require the 'http-providers' feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashingConfig;

    #[test]
    fn test_ensure_count() {
        let batch = EmbeddingBatch {
            vectors: vec![vec![1.0]],
            model: "m".into(),
        };
        assert!(batch.ensure_count(1).is_ok());
        assert!(batch.ensure_count(2).unwrap_err().is_embedding());
    }

    #[test]
    fn test_ensure_uniform() {
        let batch = |vectors: Vec<Vec<f32>>| EmbeddingBatch {
            vectors,
            model: "m".into(),
        };
        assert!(batch(vec![]).ensure_uniform(0).is_ok());
        assert!(batch(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).ensure_uniform(2).is_ok());

        assert!(batch(vec![vec![1.0, 0.0], vec![]])
            .ensure_uniform(2)
            .unwrap_err()
            .is_embedding());
        assert!(batch(vec![vec![]]).ensure_uniform(1).is_err());
        assert!(batch(vec![vec![1.0, 0.0], vec![1.0]]).ensure_uniform(2).is_err());
        assert!(batch(vec![vec![f32::NAN, 0.0]]).ensure_uniform(1).is_err());
        assert!(batch(vec![vec![1.0]]).ensure_uniform(2).is_err());
    }

    #[test]
    fn test_create_embedding_service_hashing() {
        let config = Config {
            embedding_provider: EmbeddingProvider::Hashing(HashingConfig {
                dimension: 16,
                seed: 1,
            }),
            ..Default::default()
        };
        let service = create_embedding_service(&config).unwrap();
        assert_eq!(service.embed("hello").unwrap().len(), 16);
    }

    #[cfg(feature = "http-providers")]
    #[test]
    fn test_create_embedding_service_remote() {
        let config = Config {
            embedding_provider: EmbeddingProvider::Remote(Default::default()),
            ..Default::default()
        };
        let service = create_embedding_service(&config).unwrap();
        assert_eq!(service.model(), "text-embedding-3-large");
    }
}
