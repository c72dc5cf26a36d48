//! Upstream case repository and embedding backend configuration

use serde::{Deserialize, Serialize};

/// Upstream case repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the case repository API (e.g., "https://cases.internal/api")
    pub endpoint: String,
    /// Bearer token for authentication (optional; falls back to CASEDEX_SOURCE_TOKEN)
    #[serde(default)]
    pub api_token: Option<String>,
    /// Records per extraction page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long a successful reachability probe stays valid, in seconds
    #[serde(default = "default_probe_ttl_secs")]
    pub probe_ttl_secs: u64,
}

fn default_page_size() -> usize {
    2000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_probe_ttl_secs() -> u64 {
    300
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9090/api".to_string(),
            api_token: None,
            page_size: 2000,
            timeout_secs: 30,
            probe_ttl_secs: 300,
        }
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend type: "http" for an OpenAI-compatible API, "hash" for the
    /// deterministic development backend
    #[serde(default = "default_backend")]
    pub backend: String,
    /// API endpoint for the http backend
    #[serde(default)]
    pub endpoint: Option<String>,
    /// API key (optional; falls back to CASEDEX_EMBED_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name sent to the http backend
    #[serde(default = "default_model")]
    pub model: String,
    /// Embedding dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum texts per embedding request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_backend() -> String {
    "hash".to_string()
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_max_batch_size() -> usize {
    100
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "hash".to_string(),
            endpoint: None,
            api_key: None,
            model: default_model(),
            dimensions: 384,
            timeout_secs: 30,
            max_batch_size: 100,
        }
    }
}
