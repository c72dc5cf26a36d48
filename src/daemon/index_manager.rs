//! Index Manager
//!
//! Owns the on-disk vector index and its case metadata. Provides
//! thread-safe access for concurrent reads while the sync engine is the
//! single writer. Saves are atomic: both files are written to a temporary
//! location and renamed into place, so a searcher never observes a
//! half-written index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::embedding::Embedder;
use crate::index::{CaseMetadataStore, VectorIndex};
use crate::types::{CaseMeta, Embedding, SearchResult};
use crate::util::file_size;

/// Index file name in the data directory
pub const INDEX_FILE: &str = "cases.index";
/// Metadata file name in the data directory
pub const METADATA_FILE: &str = "cases.meta.json";

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub metadata_count: usize,
    pub index_size_bytes: u64,
    pub metadata_size_bytes: u64,
    /// Whether the index holds any vectors and can serve searches
    pub trained: bool,
}

/// Dataset scale category, drives the strategy recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleCategory {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl ScaleCategory {
    /// Categorize by vector count
    pub fn from_count(count: usize) -> Self {
        if count < 100_000 {
            Self::Small
        } else if count < 1_000_000 {
            Self::Medium
        } else if count < 5_000_000 {
            Self::Large
        } else {
            Self::ExtraLarge
        }
    }
}

/// Recommended index strategy for the current scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategy {
    /// Exact flat search, best for small datasets
    Flat,
    /// Graph-based approximate search
    Hnsw,
    /// Clustered/quantized index for very large datasets
    Quantized,
}

/// Health metrics for the index pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHealth {
    pub index_exists: bool,
    pub metadata_exists: bool,
    pub index_size_bytes: u64,
    pub metadata_size_bytes: u64,
    pub total_vectors: usize,
    pub metadata_count: usize,
    /// Vector count and metadata count agree
    pub parity_ok: bool,
    pub scale: ScaleCategory,
    pub recommended_strategy: IndexStrategy,
    pub recommendations: Vec<String>,
}

struct IndexState {
    vector: VectorIndex,
    metadata: CaseMetadataStore,
}

/// Centralized index management
pub struct IndexManager {
    index_path: PathBuf,
    metadata_path: PathBuf,
    config: IndexConfig,
    embedder: Arc<dyn Embedder>,
    inner: RwLock<IndexState>,
}

impl IndexManager {
    /// Load or create the index pair in the given data directory
    pub fn load(
        data_dir: &Path,
        config: IndexConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let index_path = data_dir.join(INDEX_FILE);
        let metadata_path = data_dir.join(METADATA_FILE);

        let state = Self::open_state(&index_path, &metadata_path, &config, embedder.dimensions())?;

        info!(
            "Index manager ready: {} vectors, {} dimensions",
            state.vector.len(),
            state.vector.dimensions()
        );

        Ok(Self {
            index_path,
            metadata_path,
            config,
            embedder,
            inner: RwLock::new(state),
        })
    }

    fn open_state(
        index_path: &Path,
        metadata_path: &Path,
        config: &IndexConfig,
        dimensions: usize,
    ) -> Result<IndexState> {
        let metadata = CaseMetadataStore::load(metadata_path)?;

        let vector = if index_path.exists() {
            info!("Loading existing vector index");
            let mmap = file_size(index_path) > config.mmap_threshold_mb * 1024 * 1024;
            VectorIndex::load(index_path, config, metadata.next_key(), mmap)?
        } else {
            info!("Creating new vector index");
            VectorIndex::new(dimensions, config)?
        };

        Ok(IndexState { vector, metadata })
    }

    /// Append a batch of cases with their embeddings.
    ///
    /// Rejects vectors of mismatched dimensionality. Changes are in-memory
    /// until `save()` persists them.
    pub fn add_records(&self, items: &[(CaseMeta, Embedding)]) -> Result<usize> {
        let mut state = self.inner.write();
        debug!("Adding {} cases to index", items.len());

        for (meta, embedding) in items {
            let key = state.vector.add(embedding)?;
            state.metadata.insert(key, meta.clone());
        }

        Ok(items.len())
    }

    /// Persist the index pair atomically.
    ///
    /// Both files are written to a temporary location and renamed into
    /// place; the rename is the only moment a reader could observe a
    /// transition.
    pub fn save(&self) -> Result<()> {
        let state = self.inner.write();
        info!("Saving index ({} vectors)", state.vector.len());

        let temp_index = self.index_path.with_extension("index.tmp");
        state.vector.save(&temp_index)?;
        fs::rename(&temp_index, &self.index_path)
            .context("Failed to rename index into place")?;

        state.metadata.save(&self.metadata_path)?;
        Ok(())
    }

    /// Reload the index pair from disk, discarding in-memory state.
    /// Used after a backup restore to bring memory back in step with disk.
    pub fn reload(&self) -> Result<()> {
        info!("Reloading index from disk");
        let fresh = Self::open_state(
            &self.index_path,
            &self.metadata_path,
            &self.config,
            self.embedder.dimensions(),
        )?;
        let mut state = self.inner.write();
        *state = fresh;
        Ok(())
    }

    /// Search for cases similar to the query text.
    ///
    /// Results below the similarity threshold are dropped. The threshold
    /// defaults to the configured one.
    pub async fn search(
        &self,
        query_text: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let query_texts = vec![query_text.to_string()];
        let query = self
            .embedder
            .embed_batch(&query_texts)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedder returned no vector for query"))?;

        let state = self.inner.read();
        if state.vector.is_empty() {
            return Ok(Vec::new());
        }

        let hits = state.vector.search(&query, top_k)?;
        let results = hits
            .into_iter()
            .filter(|hit| hit.similarity >= threshold)
            .filter_map(|hit| {
                state.metadata.get(hit.key).map(|meta| SearchResult {
                    similarity: hit.similarity,
                    case: meta.clone(),
                })
            })
            .collect();

        Ok(results)
    }

    /// Whether a case id is already indexed
    pub fn contains(&self, case_id: &str) -> bool {
        self.inner.read().metadata.contains_id(case_id)
    }

    /// Snapshot of all indexed case ids, used for dedupe during sync
    pub fn indexed_ids(&self) -> std::collections::HashSet<String> {
        self.inner.read().metadata.indexed_ids()
    }

    /// Current vector count
    pub fn count(&self) -> usize {
        self.inner.read().vector.len()
    }

    /// Index statistics
    pub fn stats(&self) -> IndexStats {
        let state = self.inner.read();
        IndexStats {
            total_vectors: state.vector.len(),
            dimensions: state.vector.dimensions(),
            metadata_count: state.metadata.len(),
            index_size_bytes: file_size(&self.index_path),
            metadata_size_bytes: file_size(&self.metadata_path),
            trained: !state.vector.is_empty(),
        }
    }

    /// Health metrics: existence, sizes, count parity, scale category, and
    /// the recommended index strategy for the current scale
    pub fn health_metrics(&self) -> IndexHealth {
        let state = self.inner.read();
        let total_vectors = state.vector.len();
        let metadata_count = state.metadata.len();
        let scale = ScaleCategory::from_count(total_vectors);

        let recommended_strategy = if total_vectors < self.config.flat_threshold {
            IndexStrategy::Flat
        } else if total_vectors > self.config.quantize_threshold {
            IndexStrategy::Quantized
        } else {
            IndexStrategy::Hnsw
        };

        let mut recommendations = Vec::new();
        if total_vectors != metadata_count {
            recommendations.push(format!(
                "Vector/metadata count mismatch ({} vs {}), recommend index verification",
                total_vectors, metadata_count
            ));
        }
        if recommended_strategy == IndexStrategy::Quantized {
            recommendations
                .push("Consider a quantized index layout for better memory efficiency".to_string());
        }
        if scale == ScaleCategory::ExtraLarge {
            recommendations.push("Consider sharding the index across nodes".to_string());
        }

        IndexHealth {
            index_exists: self.index_path.exists(),
            metadata_exists: self.metadata_path.exists(),
            index_size_bytes: file_size(&self.index_path),
            metadata_size_bytes: file_size(&self.metadata_path),
            total_vectors,
            metadata_count,
            parity_ok: total_vectors == metadata_count,
            scale,
            recommended_strategy,
            recommendations,
        }
    }

    /// Path of the index file
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Path of the metadata file
    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use chrono::Utc;
    use tempfile::TempDir;

    const DIMS: usize = 16;

    fn manager(dir: &Path) -> IndexManager {
        IndexManager::load(
            dir,
            IndexConfig {
                hnsw_m: 8,
                hnsw_ef_construction: 64,
                hnsw_ef_search: 32,
                max_capacity: 1000,
                ..IndexConfig::default()
            },
            Arc::new(HashEmbedder::new(DIMS)),
        )
        .unwrap()
    }

    fn meta(case_id: &str, subject: &str) -> CaseMeta {
        CaseMeta {
            case_id: case_id.to_string(),
            case_number: format!("CN-{}", case_id),
            subject: subject.to_string(),
            status: "Closed".to_string(),
            created_at: Utc::now(),
            preview: subject.to_string(),
        }
    }

    async fn embed(text: &str) -> Embedding {
        HashEmbedder::new(DIMS)
            .embed_batch(&[text.to_string()])
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_add_and_search_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());

        let subject = "database connection timeout";
        let items = vec![(meta("a", subject), embed(subject).await)];
        manager.add_records(&items).unwrap();

        // Identical text embeds identically, so similarity is ~1.0
        let results = manager.search(subject, 5, Some(0.9)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].case.case_id, "a");
        assert!(results[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_search_empty_index() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let results = manager.search("anything", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_add_rejects_wrong_dimensions() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());

        let items = vec![(meta("a", "x"), vec![1.0, 2.0])];
        let err = manager.add_records(&items).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        {
            let manager = manager(dir.path());
            let items = vec![
                (meta("a", "first case"), embed("first case").await),
                (meta("b", "second case"), embed("second case").await),
            ];
            manager.add_records(&items).unwrap();
            manager.save().unwrap();
        }

        let manager = manager(dir.path());
        assert_eq!(manager.count(), 2);
        assert!(manager.contains("a"));
        assert!(manager.contains("b"));
        assert!(!manager.contains("c"));
    }

    #[tokio::test]
    async fn test_reload_discards_unsaved_state() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());

        let items = vec![(meta("a", "saved case"), embed("saved case").await)];
        manager.add_records(&items).unwrap();
        manager.save().unwrap();

        let items = vec![(meta("b", "unsaved case"), embed("unsaved case").await)];
        manager.add_records(&items).unwrap();
        assert_eq!(manager.count(), 2);

        manager.reload().unwrap();
        assert_eq!(manager.count(), 1);
        assert!(manager.contains("a"));
        assert!(!manager.contains("b"));
    }

    #[test]
    fn test_stats_on_empty_index() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let stats = manager.stats();
        assert_eq!(stats.total_vectors, 0);
        assert_eq!(stats.metadata_count, 0);
        assert!(!stats.trained);
        assert_eq!(stats.dimensions, DIMS);
    }

    #[test]
    fn test_scale_categories() {
        assert_eq!(ScaleCategory::from_count(0), ScaleCategory::Small);
        assert_eq!(ScaleCategory::from_count(99_999), ScaleCategory::Small);
        assert_eq!(ScaleCategory::from_count(100_000), ScaleCategory::Medium);
        assert_eq!(ScaleCategory::from_count(999_999), ScaleCategory::Medium);
        assert_eq!(ScaleCategory::from_count(1_000_000), ScaleCategory::Large);
        assert_eq!(ScaleCategory::from_count(5_000_000), ScaleCategory::ExtraLarge);
    }

    #[tokio::test]
    async fn test_health_metrics_parity() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());

        let health = manager.health_metrics();
        assert!(health.parity_ok);
        assert!(!health.index_exists);
        assert_eq!(health.scale, ScaleCategory::Small);
        assert_eq!(health.recommended_strategy, IndexStrategy::Flat);

        let items = vec![(meta("a", "some case"), embed("some case").await)];
        manager.add_records(&items).unwrap();
        manager.save().unwrap();

        let health = manager.health_metrics();
        assert!(health.index_exists);
        assert!(health.metadata_exists);
        assert!(health.parity_ok);
        assert_eq!(health.total_vectors, 1);
    }
}
