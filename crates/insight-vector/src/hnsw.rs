//! HNSW graph wrapper around usearch.
//!
//! The graph only knows vector ids; entry metadata lives in the index
//! generation that owns the graph.

use std::sync::{PoisonError, RwLock};

use tracing::debug;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::VectorError;

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Embedding dimension (must match model)
    pub dimension: usize,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Initial capacity; doubled when full
    pub capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384, // all-MiniLM-L6-v2
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            capacity: 10_000,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn options(&self) -> IndexOptions {
        IndexOptions {
            dimensions: self.dimension,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false,
        }
    }
}

/// One usearch graph. Similarity is reported as `1 - cosine distance`.
pub struct HnswGraph {
    index: RwLock<Index>,
    config: HnswConfig,
}

impl HnswGraph {
    pub fn new(config: HnswConfig) -> Result<Self, VectorError> {
        let index = Index::new(&config.options()).map_err(|e| VectorError::Index(e.to_string()))?;
        index
            .reserve(config.capacity)
            .map_err(|e| VectorError::Index(e.to_string()))?;
        Ok(Self {
            index: RwLock::new(index),
            config,
        })
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Number of vectors in the graph, removed ones excluded.
    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, values: &[f32]) -> Result<(), VectorError> {
        if values.len() != self.config.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.config.dimension,
                actual: values.len(),
            });
        }
        Ok(())
    }

    #[allow(clippy::readonly_write_lock)] // usearch::Index uses interior mutability
    pub fn add(&self, id: u64, values: &[f32]) -> Result<(), VectorError> {
        self.check_dimension(values)?;
        let index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if index.size() >= index.capacity() {
            let grown = (index.capacity() * 2).max(16);
            index
                .reserve(grown)
                .map_err(|e| VectorError::Index(e.to_string()))?;
            debug!(capacity = grown, "Grew vector graph");
        }
        index
            .add(id, values)
            .map_err(|e| VectorError::Index(e.to_string()))?;
        Ok(())
    }

    /// Up to `k` (id, similarity) pairs, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>, VectorError> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        if index.size() == 0 {
            return Ok(Vec::new());
        }
        let matches = index
            .search(query, k)
            .map_err(|e| VectorError::Index(e.to_string()))?;
        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(&id, &dist)| (id, 1.0 - dist))
            .collect())
    }

    #[allow(clippy::readonly_write_lock)] // usearch::Index uses interior mutability
    pub fn remove(&self, id: u64) -> Result<bool, VectorError> {
        let index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let removed = index
            .remove(id)
            .map_err(|e| VectorError::Index(e.to_string()))?;
        Ok(removed > 0)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}
