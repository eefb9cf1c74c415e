//! Embedding model trait and types.

use crate::error::EmbeddingError;

/// Vector embedding, normalized to unit length.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Normalize `values` to unit length. A zero vector stays zero.
    pub fn new(values: Vec<f32>) -> Self {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Self {
                values: values.into_iter().map(|x| x / norm).collect(),
            }
        } else {
            Self { values }
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]; 0 when dimensions differ.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        cosine(&self.values, &other.values)
    }
}

/// Cosine similarity of two unit vectors (plain dot product).
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model identifier, part of every fingerprint computed for it
    pub model_id: String,
    pub dimension: usize,
    /// Maximum sequence length in tokens
    pub max_sequence_length: usize,
}

/// Trait for embedding models.
///
/// Inference is CPU-bound and synchronous; async callers go through
/// `EmbeddingCache::get_or_embed`, which moves it onto the blocking pool.
pub trait EmbeddingModel: Send + Sync {
    fn info(&self) -> &ModelInfo;

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Default implementation embeds one text at a time.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn model_id(&self) -> &str {
        &self.info().model_id
    }

    fn dimension(&self) -> usize {
        self.info().dimension
    }
}
