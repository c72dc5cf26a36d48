//! Vector index and search configuration

use serde::{Deserialize, Serialize};

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// HNSW connectivity parameter (M)
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: usize,
    /// HNSW construction-time expansion factor
    #[serde(default = "default_ef_construction")]
    pub hnsw_ef_construction: usize,
    /// HNSW search-time expansion factor
    #[serde(default = "default_ef_search")]
    pub hnsw_ef_search: usize,
    /// Reserved index capacity
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    /// Index files larger than this are opened memory-mapped
    #[serde(default = "default_mmap_threshold_mb")]
    pub mmap_threshold_mb: u64,
    /// Minimum similarity for search results
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Default number of search results
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Below this vector count a flat exact index is the recommended strategy
    #[serde(default = "default_flat_threshold")]
    pub flat_threshold: usize,
    /// Above this vector count a clustered/quantized index is recommended
    #[serde(default = "default_quantize_threshold")]
    pub quantize_threshold: usize,
}

fn default_hnsw_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    128
}

fn default_max_capacity() -> usize {
    1_000_000
}

fn default_mmap_threshold_mb() -> u64 {
    1024
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_top_k() -> usize {
    10
}

fn default_flat_threshold() -> usize {
    50_000
}

fn default_quantize_threshold() -> usize {
    2_500_000
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_ef_construction(),
            hnsw_ef_search: default_ef_search(),
            max_capacity: default_max_capacity(),
            mmap_threshold_mb: default_mmap_threshold_mb(),
            similarity_threshold: default_similarity_threshold(),
            default_top_k: default_top_k(),
            flat_threshold: default_flat_threshold(),
            quantize_threshold: default_quantize_threshold(),
        }
    }
}
