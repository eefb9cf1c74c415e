//! Feature-hashing embedder.
//!
//! Maps lowercase word unigrams and bigrams into a fixed number of buckets
//! with a BLAKE3-derived index and sign. Texts sharing vocabulary land close
//! together; texts with disjoint vocabulary are near-orthogonal. Output is
//! stable across processes and platforms.

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingModel, ModelInfo};

/// Identifier used when no explicit one is given.
pub const HASH_MODEL_ID: &str = "feature-hash-v1";

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    info: ModelInfo,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self::with_model_id(HASH_MODEL_ID, dimension)
    }

    pub fn with_model_id(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            info: ModelInfo {
                model_id: model_id.into(),
                dimension,
                max_sequence_length: usize::MAX,
            },
        }
    }

    fn accumulate(&self, feature: &str, weight: f32, values: &mut [f32]) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(idx_bytes) % values.len() as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        values[bucket] += sign * weight;
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl EmbeddingModel for HashEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if self.info.dimension == 0 {
            return Err(EmbeddingError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let mut values = vec![0.0f32; self.info.dimension];
        let words = tokens(text);
        for word in &words {
            self.accumulate(word, 1.0, &mut values);
        }
        for pair in words.windows(2) {
            self.accumulate(&format!("{} {}", pair[0], pair[1]), 0.5, &mut values);
        }
        Ok(Embedding::new(values))
    }
}
