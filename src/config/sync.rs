//! Synchronization and backup configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Safety margin re-queried before last_successful_sync, in minutes.
    /// Guards against records missed due to clock or commit skew.
    #[serde(default = "default_overlap_minutes")]
    pub overlap_minutes: i64,
    /// Window size for the very first sync, in days back from now
    #[serde(default = "default_initial_window_days")]
    pub initial_window_days: i64,
    /// Records per embedding batch, caps peak memory
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    /// Bounded retry attempts for transient extraction/embedding failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Overall run timeout in seconds; expiry is treated as a failed run
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Maximum retained sync_history entries
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_overlap_minutes() -> i64 {
    5
}

fn default_initial_window_days() -> i64 {
    730
}

fn default_embed_batch_size() -> usize {
    256
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_history_limit() -> usize {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            overlap_minutes: default_overlap_minutes(),
            initial_window_days: default_initial_window_days(),
            embed_batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            run_timeout_secs: default_run_timeout_secs(),
            history_limit: default_history_limit(),
        }
    }
}

/// Backup retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backup directory, defaults to <data_dir>/backups
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Number of backups retained; oldest evicted first
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

fn default_max_backups() -> usize {
    5
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_backups: 5,
        }
    }
}
