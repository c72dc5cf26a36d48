//! Configuration for casedex

mod index;
mod logging;
mod monitoring;
mod source;
mod sync;

pub use index::IndexConfig;
pub use logging::{init_tracing, LogFormat, LogLevel, LoggingConfig};
pub use monitoring::{HttpConfig, MonitoringConfig};
pub use source::{EmbeddingConfig, SourceConfig};
pub use sync::{BackupConfig, SyncConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the index, metadata, state files, and backups
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Main configuration for the casedex daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    /// Upstream case repository
    #[serde(default)]
    pub source: SourceConfig,
    /// Embedding backend
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Vector index and search
    #[serde(default)]
    pub index: IndexConfig,
    /// Sync engine
    #[serde(default)]
    pub sync: SyncConfig,
    /// Backup retention
    #[serde(default)]
    pub backup: BackupConfig,
    /// Health monitoring thresholds
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// HTTP API server
    #[serde(default)]
    pub http: HttpConfig,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved backup directory
    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .dir
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("backups"))
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together so the user
    /// can fix everything in one pass rather than playing whack-a-mole.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Node validation
        if self.node.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }

        // Source validation
        if self.source.endpoint.is_empty() {
            errors.push("source endpoint must not be empty".to_string());
        }
        if self.source.page_size == 0 {
            errors.push("source page_size must be positive".to_string());
        }

        // Embedding validation
        if self.embedding.dimensions == 0 {
            errors.push("embedding dimensions must be positive".to_string());
        }
        if self.embedding.dimensions > 4096 {
            errors.push("embedding dimensions must be <= 4096".to_string());
        }
        if self.embedding.max_batch_size == 0 {
            errors.push("embedding max_batch_size must be positive".to_string());
        }
        match self.embedding.backend.as_str() {
            "hash" => {}
            "http" => {
                if self.embedding.endpoint.is_none() {
                    errors.push("http embedding backend requires an endpoint".to_string());
                }
            }
            other => {
                errors.push(format!("unknown embedding backend '{}'", other));
            }
        }

        // Index validation
        if self.index.hnsw_m == 0 {
            errors.push("HNSW M parameter must be positive".to_string());
        }
        if self.index.hnsw_ef_construction == 0 {
            errors.push("ef_construction must be positive".to_string());
        }
        if self.index.hnsw_ef_search == 0 {
            errors.push("ef_search must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.index.similarity_threshold) {
            errors.push("similarity_threshold must be between 0.0 and 1.0".to_string());
        }
        if self.index.default_top_k == 0 {
            errors.push("default_top_k must be positive".to_string());
        }
        if self.index.flat_threshold >= self.index.quantize_threshold {
            errors.push("flat_threshold must be below quantize_threshold".to_string());
        }

        // Sync validation
        if self.sync.overlap_minutes < 0 {
            errors.push("sync overlap_minutes must not be negative".to_string());
        }
        if self.sync.initial_window_days <= 0 {
            errors.push("sync initial_window_days must be positive".to_string());
        }
        if self.sync.embed_batch_size == 0 {
            errors.push("sync embed_batch_size must be positive".to_string());
        }
        if self.sync.max_retries == 0 {
            errors.push("sync max_retries must be positive".to_string());
        }
        if self.sync.history_limit == 0 {
            errors.push("sync history_limit must be positive".to_string());
        }

        // Backup validation
        if self.backup.max_backups == 0 {
            errors.push("max_backups must be positive".to_string());
        }

        // Monitoring validation
        if self.monitoring.memory_warning_percent >= self.monitoring.memory_critical_percent {
            errors.push(
                "memory_warning_percent must be below memory_critical_percent".to_string(),
            );
        }
        if self.monitoring.health_interval_secs == 0 {
            errors.push("health_interval_secs must be positive".to_string());
        }

        // HTTP validation
        if self.http.enabled && self.http.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "invalid HTTP listen address '{}'",
                self.http.listen_addr
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn default_config_passes_validation() {
        let cfg = valid_config();
        assert!(cfg.validate().is_ok(), "default config should be valid");
    }

    #[test]
    fn validate_rejects_zero_embedding_dimensions() {
        let mut cfg = valid_config();
        cfg.embedding.dimensions = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("embedding dimensions must be positive"));
    }

    #[test]
    fn validate_rejects_oversized_embedding_dimensions() {
        let mut cfg = valid_config();
        cfg.embedding.dimensions = 5000;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("embedding dimensions must be <= 4096"));
    }

    #[test]
    fn validate_rejects_unknown_embedding_backend() {
        let mut cfg = valid_config();
        cfg.embedding.backend = "grpc".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("unknown embedding backend"));
    }

    #[test]
    fn validate_rejects_http_backend_without_endpoint() {
        let mut cfg = valid_config();
        cfg.embedding.backend = "http".to_string();
        cfg.embedding.endpoint = None;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("requires an endpoint"));
    }

    #[test]
    fn validate_rejects_zero_hnsw_m() {
        let mut cfg = valid_config();
        cfg.index.hnsw_m = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("HNSW M parameter must be positive"));
    }

    #[test]
    fn validate_rejects_out_of_range_similarity_threshold() {
        let mut cfg = valid_config();
        cfg.index.similarity_threshold = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("similarity_threshold must be between 0.0 and 1.0"));
    }

    #[test]
    fn validate_rejects_negative_overlap() {
        let mut cfg = valid_config();
        cfg.sync.overlap_minutes = -1;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("overlap_minutes must not be negative"));
    }

    #[test]
    fn validate_rejects_zero_max_backups() {
        let mut cfg = valid_config();
        cfg.backup.max_backups = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_backups must be positive"));
    }

    #[test]
    fn validate_rejects_inverted_memory_thresholds() {
        let mut cfg = valid_config();
        cfg.monitoring.memory_warning_percent = 95.0;
        cfg.monitoring.memory_critical_percent = 90.0;
        let err = cfg.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("memory_warning_percent must be below memory_critical_percent"));
    }

    #[test]
    fn validate_rejects_bad_listen_addr_when_enabled() {
        let mut cfg = valid_config();
        cfg.http.enabled = true;
        cfg.http.listen_addr = "not-an-addr".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("invalid HTTP listen address"));
    }

    #[test]
    fn validate_skips_listen_addr_when_disabled() {
        let mut cfg = valid_config();
        cfg.http.enabled = false;
        cfg.http.listen_addr = "not-an-addr".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_data_dir() {
        let mut cfg = valid_config();
        cfg.node.data_dir = PathBuf::from("");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("data_dir must not be empty"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut cfg = valid_config();
        cfg.embedding.dimensions = 0;
        cfg.index.hnsw_m = 0;
        cfg.backup.max_backups = 0;
        let err = cfg.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("embedding dimensions must be positive"));
        assert!(msg.contains("HNSW M parameter must be positive"));
        assert!(msg.contains("max_backups must be positive"));
    }

    #[test]
    fn backup_dir_defaults_under_data_dir() {
        let mut cfg = valid_config();
        cfg.node.data_dir = PathBuf::from("/var/lib/casedex");
        assert_eq!(cfg.backup_dir(), PathBuf::from("/var/lib/casedex/backups"));

        cfg.backup.dir = Some(PathBuf::from("/backups"));
        assert_eq!(cfg.backup_dir(), PathBuf::from("/backups"));
    }

    #[test]
    fn default_sync_config_values() {
        let sync = SyncConfig::default();
        assert_eq!(sync.overlap_minutes, 5);
        assert_eq!(sync.initial_window_days, 730);
        assert_eq!(sync.embed_batch_size, 256);
        assert_eq!(sync.max_retries, 3);
        assert_eq!(sync.history_limit, 100);
    }

    #[test]
    fn default_monitoring_thresholds() {
        let mon = MonitoringConfig::default();
        assert!((mon.memory_warning_percent - 80.0).abs() < f64::EPSILON);
        assert!((mon.memory_critical_percent - 90.0).abs() < f64::EPSILON);
        assert!((mon.freshness_warning_hours - 24.0).abs() < f64::EPSILON);
        assert!((mon.error_rate_critical_percent - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn config_parses_from_toml() {
        let toml_str = r#"
            [node]
            data_dir = "/tmp/casedex"

            [source]
            endpoint = "https://cases.example.com/api"
            page_size = 500

            [embedding]
            backend = "http"
            endpoint = "https://api.openai.com/v1/embeddings"
            dimensions = 1536

            [sync]
            overlap_minutes = 10
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.node.data_dir, PathBuf::from("/tmp/casedex"));
        assert_eq!(cfg.source.page_size, 500);
        assert_eq!(cfg.embedding.dimensions, 1536);
        assert_eq!(cfg.sync.overlap_minutes, 10);
        // Untouched sections keep defaults
        assert_eq!(cfg.backup.max_backups, 5);
        assert!(cfg.validate().is_ok());
    }
}
