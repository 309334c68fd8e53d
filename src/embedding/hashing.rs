//! Local deterministic embedder.
//!
//! Each text is hashed together with the seed into a 64-bit RNG seed; the
//! vector is drawn uniformly from `[-1, 1)` and L2-normalized. Equal
//! `(seed, text)` pairs always produce identical vectors, across processes
//! and platforms. The vectors carry no semantics beyond identity: equal
//! texts are similar, different texts are near-orthogonal.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use super::{EmbeddingBatch, EmbeddingService};
use crate::error::Result;
use crate::types::Embedding;

const MODEL_NAME: &str = "hashing";

/// Seeded hashing embedder.
#[derive(Clone, Debug)]
pub struct HashingEmbedding {
    dimension: usize,
    seed: u64,
}

impl HashingEmbedding {
    /// Creates an embedder producing `dimension`-length vectors.
    pub fn new(dimension: usize, seed: u64) -> Self {
        Self { dimension, seed }
    }

    /// Output vector length.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn rng_seed(&self, text: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    fn vector_for(&self, text: &str) -> Embedding {
        let mut rng = StdRng::seed_from_u64(self.rng_seed(text));
        let mut vector: Embedding = (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingService for HashingEmbedding {
    fn embed_batch(&self, texts: &[&str]) -> Result<EmbeddingBatch> {
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|text| self.vector_for(text)).collect(),
            model: MODEL_NAME.to_string(),
        })
    }

    fn model(&self) -> &str {
        MODEL_NAME
    }
}
