//! HTTP embedding backend for OpenAI-compatible APIs
//!
//! Works against any OpenAI-compatible embedding endpoint: OpenAI itself,
//! Azure, or local servers (vLLM, Ollama, text-embeddings-inference).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::types::Embedding;

use super::{normalize, Embedder};

/// Configuration for the HTTP embedding backend
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    /// API endpoint (e.g., "https://api.openai.com/v1/embeddings")
    pub endpoint: String,
    /// API key, optional for local servers
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    /// Embedding dimensions
    pub dimensions: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum texts per request
    pub max_batch_size: usize,
}

/// HTTP embedding backend
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: HttpEmbedderConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl HttpEmbedder {
    /// Create a new HTTP embedding backend
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, SyncError> {
        info!(
            "Initializing HTTP embedding backend: endpoint={}, model={}",
            config.endpoint, config.model
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = &config.api_key {
            let auth_value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| SyncError::Config(format!("Invalid API key format: {}", e)))?,
            );
        } else if config.endpoint.contains("openai.com") || config.endpoint.contains("azure.com") {
            warn!("No API key provided for {}", config.endpoint);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Embedding>, SyncError> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            // Only OpenAI text-embedding-3-* accepts an explicit dimensions field
            dimensions: if self.config.model.contains("text-embedding-3") {
                Some(self.config.dimensions)
            } else {
                None
            },
            encoding_format: "float",
        };

        debug!(
            "Sending embedding request to {} for {} texts",
            self.config.endpoint,
            texts.len()
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| SyncError::Embedding(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Embedding(format!(
                "embedding API error ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Embedding(format!("Failed to parse response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(SyncError::Embedding(format!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                parsed.data.len()
            )));
        }

        // Sort by index and normalize for cosine similarity
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        Ok(data.into_iter().map(|d| normalize(&d.embedding)).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, SyncError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if texts.len() <= self.config.max_batch_size {
            return self.request_embeddings(texts).await;
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.max_batch_size) {
            all.extend(self.request_embeddings(chunk).await?);
        }
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
