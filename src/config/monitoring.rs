//! Health monitoring and HTTP API configuration

use serde::{Deserialize, Serialize};

/// Health monitoring thresholds and polling interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between background health checks
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Memory usage percent above which a warning alert fires
    #[serde(default = "default_memory_warning")]
    pub memory_warning_percent: f64,
    /// Memory usage percent above which a critical alert fires
    #[serde(default = "default_memory_critical")]
    pub memory_critical_percent: f64,
    /// CPU usage percent above which a warning alert fires
    #[serde(default = "default_cpu_warning")]
    pub cpu_warning_percent: f64,
    /// Free disk space in GB below which a critical alert fires
    #[serde(default = "default_disk_min_free_gb")]
    pub disk_min_free_gb: f64,
    /// Hours since the last successful sync above which a warning fires
    #[serde(default = "default_freshness_warning_hours")]
    pub freshness_warning_hours: f64,
    /// Operation error rate percent above which a critical alert fires
    #[serde(default = "default_error_rate_critical")]
    pub error_rate_critical_percent: f64,
    /// p95 latency in milliseconds above which a warning fires
    #[serde(default = "default_p95_warning_ms")]
    pub p95_warning_ms: f64,
    /// Maximum persisted health report history entries
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_health_interval_secs() -> u64 {
    60
}

fn default_memory_warning() -> f64 {
    80.0
}

fn default_memory_critical() -> f64 {
    90.0
}

fn default_cpu_warning() -> f64 {
    90.0
}

fn default_disk_min_free_gb() -> f64 {
    5.0
}

fn default_freshness_warning_hours() -> f64 {
    24.0
}

fn default_error_rate_critical() -> f64 {
    5.0
}

fn default_p95_warning_ms() -> f64 {
    1000.0
}

fn default_history_limit() -> usize {
    1440
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval_secs(),
            memory_warning_percent: default_memory_warning(),
            memory_critical_percent: default_memory_critical(),
            cpu_warning_percent: default_cpu_warning(),
            disk_min_free_gb: default_disk_min_free_gb(),
            freshness_warning_hours: default_freshness_warning_hours(),
            error_rate_critical_percent: default_error_rate_critical(),
            p95_warning_ms: default_p95_warning_ms(),
            history_limit: default_history_limit(),
        }
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Enable the HTTP API server
    #[serde(default)]
    pub enabled: bool,
    /// Listen address (e.g., "0.0.0.0:8080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// API keys for authentication (empty = no auth required)
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Enable CORS for browser-based clients
    #[serde(default)]
    pub cors_enabled: bool,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_listen_addr(),
            api_keys: Vec::new(),
            cors_enabled: false,
        }
    }
}
