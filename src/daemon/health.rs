//! Health Monitoring
//!
//! Periodically gathers system resources, index metrics, performance
//! aggregates, and sync freshness, then applies configurable thresholds to
//! produce severity-tagged alerts. Overall status is the maximum severity
//! observed. The upstream reachability probe is cached with a short TTL so
//! frequent status polls do not hammer the case repository.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::MonitoringConfig;
use crate::source::{CaseSource, TtlCache};
use crate::util::atomic_write;

use super::index_manager::{IndexHealth, IndexManager};
use super::perf::PerformanceRecorder;
use super::sync::SyncEngine;

/// Health history file name in the data directory
pub const HEALTH_HISTORY_FILE: &str = "health_history.json";

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
}

/// A single threshold violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: String,
    pub severity: Severity,
    pub message: String,
}

/// Best-effort system resource metrics. Fields are None where the
/// platform offers no cheap way to measure them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_usage_percent: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub memory_available_gb: Option<f64>,
    pub disk_free_gb: Option<f64>,
}

/// Aggregated performance indicators for threshold checks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfSummary {
    pub error_rate_percent: f64,
    pub p95_ms: f64,
}

/// One health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub status: OverallStatus,
    pub resources: ResourceMetrics,
    pub index: IndexHealth,
    pub performance: PerfSummary,
    pub hours_since_last_sync: Option<f64>,
    pub source_reachable: Option<bool>,
    pub alerts: Vec<Alert>,
}

/// Apply thresholds to gathered metrics and produce alerts.
///
/// `expect_index` suppresses the missing-file alerts before the first
/// successful sync, when there is legitimately nothing on disk.
pub fn evaluate_alerts(
    config: &MonitoringConfig,
    resources: &ResourceMetrics,
    index: &IndexHealth,
    expect_index: bool,
    perf: &PerfSummary,
    hours_since_last_sync: Option<f64>,
    source_reachable: Option<bool>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if let Some(cpu) = resources.cpu_usage_percent {
        if cpu > config.cpu_warning_percent {
            alerts.push(Alert {
                kind: "cpu_high".to_string(),
                severity: Severity::Warning,
                message: format!("CPU usage high: {:.1}%", cpu),
            });
        }
    }

    if let Some(mem) = resources.memory_usage_percent {
        if mem > config.memory_critical_percent {
            alerts.push(Alert {
                kind: "memory_high".to_string(),
                severity: Severity::Critical,
                message: format!("Memory usage critical: {:.1}%", mem),
            });
        } else if mem > config.memory_warning_percent {
            alerts.push(Alert {
                kind: "memory_high".to_string(),
                severity: Severity::Warning,
                message: format!("Memory usage high: {:.1}%", mem),
            });
        }
    }

    if let Some(disk) = resources.disk_free_gb {
        if disk < config.disk_min_free_gb {
            alerts.push(Alert {
                kind: "disk_low".to_string(),
                severity: Severity::Critical,
                message: format!("Low disk space: {:.1}GB free", disk),
            });
        }
    }

    if expect_index {
        if !index.index_exists {
            alerts.push(Alert {
                kind: "index_missing".to_string(),
                severity: Severity::Critical,
                message: "Vector index file not found".to_string(),
            });
        }
        if !index.metadata_exists {
            alerts.push(Alert {
                kind: "metadata_missing".to_string(),
                severity: Severity::Critical,
                message: "Metadata file not found".to_string(),
            });
        }
    }
    if !index.parity_ok {
        alerts.push(Alert {
            kind: "count_mismatch".to_string(),
            severity: Severity::Warning,
            message: format!(
                "Vector/metadata count mismatch: {} vs {}",
                index.total_vectors, index.metadata_count
            ),
        });
    }

    if perf.error_rate_percent > config.error_rate_critical_percent {
        alerts.push(Alert {
            kind: "high_errors".to_string(),
            severity: Severity::Critical,
            message: format!("High error rate: {:.1}%", perf.error_rate_percent),
        });
    }
    if perf.p95_ms > config.p95_warning_ms {
        alerts.push(Alert {
            kind: "slow_operations".to_string(),
            severity: Severity::Warning,
            message: format!("p95 latency {:.0}ms above target", perf.p95_ms),
        });
    }

    if let Some(hours) = hours_since_last_sync {
        if hours > config.freshness_warning_hours {
            alerts.push(Alert {
                kind: "stale_sync".to_string(),
                severity: Severity::Warning,
                message: format!("Last successful sync was {:.1} hours ago", hours),
            });
        }
    }

    if source_reachable == Some(false) {
        alerts.push(Alert {
            kind: "source_unreachable".to_string(),
            severity: Severity::Critical,
            message: "Case repository is unreachable".to_string(),
        });
    }

    alerts
}

/// Overall status is the maximum severity across alerts
pub fn overall_status(alerts: &[Alert]) -> OverallStatus {
    match alerts.iter().map(|a| a.severity).max() {
        None => OverallStatus::Healthy,
        Some(Severity::Warning) => OverallStatus::Warning,
        Some(Severity::Critical) => OverallStatus::Critical,
    }
}

/// Periodic health checker
pub struct HealthMonitor {
    config: MonitoringConfig,
    index: Arc<IndexManager>,
    engine: Arc<SyncEngine>,
    perf: Arc<PerformanceRecorder>,
    source: Arc<dyn CaseSource>,
    probe_cache: TtlCache<bool>,
    history_path: PathBuf,
    history: Mutex<Vec<HealthReport>>,
    data_dir: PathBuf,
}

impl HealthMonitor {
    pub fn new(
        config: MonitoringConfig,
        index: Arc<IndexManager>,
        engine: Arc<SyncEngine>,
        perf: Arc<PerformanceRecorder>,
        source: Arc<dyn CaseSource>,
        probe_ttl: Duration,
        data_dir: &std::path::Path,
    ) -> Self {
        Self {
            config,
            index,
            engine,
            perf,
            source,
            probe_cache: TtlCache::new(probe_ttl),
            history_path: data_dir.join(HEALTH_HISTORY_FILE),
            history: Mutex::new(Vec::new()),
            data_dir: data_dir.to_path_buf(),
        }
    }

    /// Perform one comprehensive health check
    pub async fn check_health(&self) -> HealthReport {
        let resources = gather_resources(&self.data_dir);
        let index = self.index.health_metrics();
        let perf = PerfSummary {
            error_rate_percent: self.perf.overall_error_rate() * 100.0,
            p95_ms: self.perf.worst_p95_ms(),
        };

        let sync_state = self.engine.state();
        let hours_since_last_sync = sync_state
            .last_successful_sync
            .map(|t| (Utc::now() - t).num_seconds() as f64 / 3600.0);
        let expect_index = sync_state.last_successful_sync.is_some();

        let source_reachable = Some(self.probe_source().await);

        let alerts = evaluate_alerts(
            &self.config,
            &resources,
            &index,
            expect_index,
            &perf,
            hours_since_last_sync,
            source_reachable,
        );

        let report = HealthReport {
            timestamp: Utc::now(),
            status: overall_status(&alerts),
            resources,
            index,
            performance: perf,
            hours_since_last_sync,
            source_reachable,
            alerts,
        };

        self.append_history(report.clone());
        report
    }

    /// Recent health reports, newest last
    pub fn history(&self) -> Vec<HealthReport> {
        self.history.lock().clone()
    }

    /// Start the background polling loop
    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let interval_secs = self.config.health_interval_secs;

        tokio::spawn(async move {
            info!("Health monitor started ({}s interval)", interval_secs);
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.check_health().await;
                        for alert in &report.alerts {
                            match alert.severity {
                                Severity::Critical => error!("CRITICAL: {}", alert.message),
                                Severity::Warning => warn!("WARNING: {}", alert.message),
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Health monitor stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Probe the upstream through the TTL cache
    async fn probe_source(&self) -> bool {
        if let Some(cached) = self.probe_cache.get() {
            return cached;
        }
        let reachable = self.source.probe().await.is_ok();
        self.probe_cache.put(reachable);
        reachable
    }

    fn append_history(&self, report: HealthReport) {
        let mut history = self.history.lock();
        history.push(report);
        let excess = history.len().saturating_sub(self.config.history_limit);
        if excess > 0 {
            history.drain(..excess);
        }

        match serde_json::to_vec(&*history) {
            Ok(bytes) => {
                if let Err(e) = atomic_write(&self.history_path, &bytes) {
                    warn!("Failed to persist health history: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize health history: {}", e),
        }
    }
}

/// Gather best-effort resource metrics for the data directory's filesystem
fn gather_resources(data_dir: &std::path::Path) -> ResourceMetrics {
    ResourceMetrics {
        cpu_usage_percent: cpu_usage_percent(),
        memory_usage_percent: memory_usage().map(|(used, _)| used),
        memory_available_gb: memory_usage().map(|(_, avail)| avail),
        disk_free_gb: disk_free_gb(data_dir),
    }
}

/// Memory usage as (used percent, available GB), from /proc/meminfo
#[cfg(target_os = "linux")]
fn memory_usage() -> Option<(f64, f64)> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kb = None;
    let mut avail_kb = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = rest.trim().split_whitespace().next()?.parse::<f64>().ok();
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            avail_kb = rest.trim().split_whitespace().next()?.parse::<f64>().ok();
        }
    }
    let total = total_kb?;
    let avail = avail_kb?;
    if total <= 0.0 {
        return None;
    }
    let used_percent = (1.0 - avail / total) * 100.0;
    Some((used_percent, avail / (1024.0 * 1024.0)))
}

#[cfg(not(target_os = "linux"))]
fn memory_usage() -> Option<(f64, f64)> {
    None
}

/// One-minute load average normalized by core count, from /proc/loadavg
#[cfg(target_os = "linux")]
fn cpu_usage_percent() -> Option<f64> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    let load1: f64 = content.split_whitespace().next()?.parse().ok()?;
    let cores = std::thread::available_parallelism().ok()?.get() as f64;
    Some((load1 / cores * 100.0).min(100.0))
}

#[cfg(not(target_os = "linux"))]
fn cpu_usage_percent() -> Option<f64> {
    None
}

/// Free space on the filesystem holding the data directory, in GB
#[cfg(unix)]
fn disk_free_gb(path: &std::path::Path) -> Option<f64> {
    use std::os::unix::ffi::OsStrExt;

    let target = if path.exists() {
        path
    } else {
        path.parent().filter(|p| p.exists())?
    };

    let c_path = std::ffi::CString::new(target.as_os_str().as_bytes()).ok()?;
    // Safety: statvfs writes into the zeroed struct on success only
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return None;
        }
        let free_bytes = stat.f_bavail as u64 * stat.f_frsize as u64;
        Some(free_bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(not(unix))]
fn disk_free_gb(_path: &std::path::Path) -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::index_manager::{IndexStrategy, ScaleCategory};

    fn healthy_index() -> IndexHealth {
        IndexHealth {
            index_exists: true,
            metadata_exists: true,
            index_size_bytes: 1024,
            metadata_size_bytes: 512,
            total_vectors: 100,
            metadata_count: 100,
            parity_ok: true,
            scale: ScaleCategory::Small,
            recommended_strategy: IndexStrategy::Flat,
            recommendations: Vec::new(),
        }
    }

    fn config() -> MonitoringConfig {
        MonitoringConfig::default()
    }

    #[test]
    fn test_memory_95_against_80_90_thresholds_is_critical() {
        let resources = ResourceMetrics {
            memory_usage_percent: Some(95.0),
            ..ResourceMetrics::default()
        };

        let alerts = evaluate_alerts(
            &config(),
            &resources,
            &healthy_index(),
            true,
            &PerfSummary::default(),
            None,
            Some(true),
        );

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "memory_high");
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(overall_status(&alerts), OverallStatus::Critical);
    }

    #[test]
    fn test_memory_85_is_warning() {
        let resources = ResourceMetrics {
            memory_usage_percent: Some(85.0),
            ..ResourceMetrics::default()
        };

        let alerts = evaluate_alerts(
            &config(),
            &resources,
            &healthy_index(),
            true,
            &PerfSummary::default(),
            None,
            Some(true),
        );

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(overall_status(&alerts), OverallStatus::Warning);
    }

    #[test]
    fn test_no_alerts_is_healthy() {
        let alerts = evaluate_alerts(
            &config(),
            &ResourceMetrics::default(),
            &healthy_index(),
            true,
            &PerfSummary::default(),
            Some(1.0),
            Some(true),
        );
        assert!(alerts.is_empty());
        assert_eq!(overall_status(&alerts), OverallStatus::Healthy);
    }

    #[test]
    fn test_stale_sync_warning() {
        let alerts = evaluate_alerts(
            &config(),
            &ResourceMetrics::default(),
            &healthy_index(),
            true,
            &PerfSummary::default(),
            Some(25.0),
            Some(true),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "stale_sync");
        assert_eq!(alerts[0].severity, Severity::Warning);
    }

    #[test]
    fn test_missing_index_critical_once_expected() {
        let mut index = healthy_index();
        index.index_exists = false;
        index.metadata_exists = false;

        // Before the first sync nothing is expected on disk
        let alerts = evaluate_alerts(
            &config(),
            &ResourceMetrics::default(),
            &index,
            false,
            &PerfSummary::default(),
            None,
            Some(true),
        );
        assert!(alerts.is_empty());

        // After a successful sync the files must exist
        let alerts = evaluate_alerts(
            &config(),
            &ResourceMetrics::default(),
            &index,
            true,
            &PerfSummary::default(),
            Some(1.0),
            Some(true),
        );
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity == Severity::Critical));
    }

    #[test]
    fn test_error_rate_and_latency_alerts() {
        let perf = PerfSummary {
            error_rate_percent: 7.5,
            p95_ms: 1500.0,
        };
        let alerts = evaluate_alerts(
            &config(),
            &ResourceMetrics::default(),
            &healthy_index(),
            true,
            &perf,
            Some(1.0),
            Some(true),
        );

        assert_eq!(alerts.len(), 2);
        let errors = alerts.iter().find(|a| a.kind == "high_errors").unwrap();
        assert_eq!(errors.severity, Severity::Critical);
        let slow = alerts.iter().find(|a| a.kind == "slow_operations").unwrap();
        assert_eq!(slow.severity, Severity::Warning);
    }

    #[test]
    fn test_unreachable_source_is_critical() {
        let alerts = evaluate_alerts(
            &config(),
            &ResourceMetrics::default(),
            &healthy_index(),
            true,
            &PerfSummary::default(),
            Some(1.0),
            Some(false),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "source_unreachable");
        assert_eq!(overall_status(&alerts), OverallStatus::Critical);
    }

    #[test]
    fn test_parity_mismatch_is_warning() {
        let mut index = healthy_index();
        index.metadata_count = 99;
        index.parity_ok = false;

        let alerts = evaluate_alerts(
            &config(),
            &ResourceMetrics::default(),
            &index,
            true,
            &PerfSummary::default(),
            Some(1.0),
            Some(true),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "count_mismatch");
    }
}
