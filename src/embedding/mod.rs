//! Embedding backends
//!
//! The sync pipeline consumes embeddings through the `Embedder` trait. Two
//! backends are provided: an HTTP client for OpenAI-compatible APIs, and a
//! deterministic hash-derived backend for development and tests. The hash
//! backend is an explicit configuration choice, never a silent fallback:
//! a failed embedding call during sync is an error, not a substitution.

mod http;

pub use http::{HttpEmbedder, HttpEmbedderConfig};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::SyncError;
use crate::types::Embedding;

/// Text-to-vector backend with fixed output dimensionality
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, SyncError>;

    /// Output dimensionality of every vector this backend produces
    fn dimensions(&self) -> usize;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Build the configured embedding backend.
///
/// Unknown backends are rejected here; config validation reports them
/// earlier with a friendlier message.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<std::sync::Arc<dyn Embedder>, SyncError> {
    match config.backend.as_str() {
        "hash" => Ok(std::sync::Arc::new(HashEmbedder::new(config.dimensions))),
        "http" => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| SyncError::Config("http embedding backend requires an endpoint".to_string()))?;
            let embedder = HttpEmbedder::new(HttpEmbedderConfig {
                endpoint,
                api_key: config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("CASEDEX_EMBED_API_KEY").ok()),
                model: config.model.clone(),
                dimensions: config.dimensions,
                timeout_secs: config.timeout_secs,
                max_batch_size: config.max_batch_size,
            })?;
            Ok(std::sync::Arc::new(embedder))
        }
        other => Err(SyncError::Config(format!(
            "unknown embedding backend '{}'",
            other
        ))),
    }
}

/// Deterministic hash-derived embedding backend.
///
/// Produces unit-length vectors that are stable for identical content but
/// carry no semantic meaning. Useful for development, demos without model
/// access, and tests.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut values = Vec::with_capacity(self.dimensions);
        let mut counter: u64 = 0;

        // Stretch the digest stream until we have one value per dimension
        while values.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if values.len() >= self.dimensions {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                values.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }

        normalize(&values)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, SyncError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

/// Normalize an embedding vector to unit length
pub fn normalize(embedding: &[f32]) -> Embedding {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        embedding.iter().map(|x| x / norm).collect()
    } else {
        embedding.to_vec()
    }
}
