//! HNSW vector index wrapper over USearch

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::config::IndexConfig;
use crate::types::Embedding;

/// Vector index for storing and querying case embeddings.
///
/// Keys are assigned by the caller (the index manager keeps them in step
/// with the metadata store). Cosine metric throughout; similarity is
/// `1 - distance`.
pub struct VectorIndex {
    index: Index,
    next_key: AtomicU64,
    dimensions: usize,
}

/// A raw nearest-neighbor hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub key: u64,
    pub similarity: f32,
}

fn index_options(dimensions: usize, config: &IndexConfig) -> IndexOptions {
    IndexOptions {
        dimensions,
        metric: MetricKind::Cos,
        quantization: ScalarKind::F32,
        connectivity: config.hnsw_m,
        expansion_add: config.hnsw_ef_construction,
        expansion_search: config.hnsw_ef_search,
        multi: false,
    }
}

impl VectorIndex {
    /// Create a new empty index
    pub fn new(dimensions: usize, config: &IndexConfig) -> Result<Self> {
        info!(
            "Creating vector index: {} dimensions, M={}, ef_construction={}",
            dimensions, config.hnsw_m, config.hnsw_ef_construction
        );

        let index = Index::new(&index_options(dimensions, config))
            .context("Failed to create USearch index")?;
        index
            .reserve(config.max_capacity)
            .context("Failed to reserve index capacity")?;

        Ok(Self {
            index,
            next_key: AtomicU64::new(0),
            dimensions,
        })
    }

    /// Load the index from disk.
    ///
    /// `next_key` resumes key assignment; the metadata store knows the
    /// highest key in use. When `memory_mapped` is set the file is opened
    /// as a view instead of being read into memory, bounding resident
    /// memory for large indexes.
    pub fn load(
        path: impl AsRef<Path>,
        config: &IndexConfig,
        next_key: u64,
        memory_mapped: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!(
            "Loading vector index from: {} (mmap: {})",
            path.display(),
            memory_mapped
        );

        // Dimensions are read back from the file
        let index = Index::new(&index_options(0, config))?;
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid index path"))?;

        if memory_mapped {
            index.view(path_str).context("Failed to map index")?;
        } else {
            index.load(path_str).context("Failed to load index")?;
        }

        let dimensions = index.dimensions();

        // The loaded index only has capacity for existing vectors
        let current_size = index.size();
        let target_capacity = config.max_capacity.max(current_size + 100_000);
        index
            .reserve(target_capacity)
            .context("Failed to reserve additional capacity after loading")?;

        Ok(Self {
            index,
            next_key: AtomicU64::new(next_key),
            dimensions,
        })
    }

    /// Save the index to the given path.
    ///
    /// Callers are responsible for atomicity (write to a temp path, then
    /// rename); the index manager does exactly that.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        debug!("Saving vector index to: {}", path.display());

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid index path"))?;
        self.index.save(path_str).context("Failed to save index")?;
        Ok(())
    }

    /// Add a single embedding, returning its assigned key.
    /// Rejects vectors of mismatched dimensionality.
    pub fn add(&self, embedding: &Embedding) -> Result<u64> {
        anyhow::ensure!(
            embedding.len() == self.dimensions,
            "Embedding dimension mismatch: expected {}, got {}",
            self.dimensions,
            embedding.len()
        );

        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        self.index
            .add(key, embedding)
            .context("Failed to add to index")?;
        Ok(key)
    }

    /// Search for nearest neighbors
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<VectorHit>> {
        anyhow::ensure!(
            query.len() == self.dimensions,
            "Query dimension mismatch: expected {}, got {}",
            self.dimensions,
            query.len()
        );

        let matches = self.index.search(query, k).context("Search failed")?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(&key, &distance)| VectorHit {
                key,
                similarity: 1.0 - distance,
            })
            .collect())
    }

    /// Number of vectors in the index
    pub fn len(&self) -> usize {
        self.index.size()
    }

    /// Whether the index holds no vectors
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimensionality
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> IndexConfig {
        IndexConfig {
            hnsw_m: 8,
            hnsw_ef_construction: 100,
            hnsw_ef_search: 50,
            max_capacity: 1000,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn test_add_and_search() {
        let index = VectorIndex::new(4, &test_config()).unwrap();

        index.add(&vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        index.add(&vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        index.add(&vec![0.9, 0.1, 0.0, 0.0]).unwrap();

        let results = index.search(&vec![1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, 0);
        assert!(results[0].similarity > 0.99);
    }

    #[test]
    fn test_add_rejects_dimension_mismatch() {
        let index = VectorIndex::new(4, &test_config()).unwrap();
        let err = index.add(&vec![1.0, 0.0]).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_search_rejects_dimension_mismatch() {
        let index = VectorIndex::new(4, &test_config()).unwrap();
        index.add(&vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&vec![1.0], 1).is_err());
    }

    #[test]
    fn test_keys_assigned_sequentially() {
        let index = VectorIndex::new(2, &test_config()).unwrap();
        assert_eq!(index.add(&vec![1.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&vec![0.0, 1.0]).unwrap(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_persistence_roundtrip() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let index_path = temp_dir.path().join("test.index");
        let config = test_config();

        {
            let index = VectorIndex::new(4, &config).unwrap();
            index.add(&vec![1.0, 0.0, 0.0, 0.0]).unwrap();
            index.add(&vec![0.0, 1.0, 0.0, 0.0]).unwrap();
            index.save(&index_path).unwrap();
        }

        {
            let index = VectorIndex::load(&index_path, &config, 2, false).unwrap();
            assert_eq!(index.len(), 2);
            assert_eq!(index.dimensions(), 4);

            // New keys continue after the loaded ones
            assert_eq!(index.add(&vec![0.5, 0.5, 0.0, 0.0]).unwrap(), 2);

            let results = index.search(&vec![1.0, 0.0, 0.0, 0.0], 1).unwrap();
            assert_eq!(results[0].key, 0);
        }
    }
}
