//! Performance recording
//!
//! Tracks duration and outcome of every instrumented operation as
//! in-memory rolling aggregates. Individual samples are never persisted,
//! only the aggregate snapshot on explicit save.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::util::atomic_write;

/// Samples retained per operation for percentile calculation
const SAMPLE_WINDOW: usize = 1000;

/// Duration above which an operation is logged as slow
const SLOW_OPERATION_MS: f64 = 1000.0;

/// Rolling state for one operation
#[derive(Debug, Default)]
struct OpSamples {
    count: u64,
    errors: u64,
    /// Durations in milliseconds, successes only, bounded window
    durations_ms: VecDeque<f64>,
}

/// Aggregated statistics for one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpStats {
    pub operation: String,
    pub count: u64,
    pub errors: u64,
    /// Errors as a fraction of all recorded calls, 0.0 to 1.0
    pub error_rate: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

/// A human-readable optimization hint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub operation: String,
    pub severity: RecommendationSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSeverity {
    Medium,
    High,
}

/// Records duration/outcome of instrumented operations
pub struct PerformanceRecorder {
    ops: RwLock<HashMap<String, OpSamples>>,
    snapshot_path: PathBuf,
}

impl PerformanceRecorder {
    /// Create a recorder that saves snapshots under the given path
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self {
            ops: RwLock::new(HashMap::new()),
            snapshot_path,
        }
    }

    /// Record one operation sample
    pub fn record(&self, operation: &str, duration: Duration, success: bool) {
        let ms = duration.as_secs_f64() * 1000.0;
        if ms > SLOW_OPERATION_MS {
            warn!("Slow operation '{}': {:.0}ms", operation, ms);
        }

        let mut ops = self.ops.write();
        let samples = ops.entry(operation.to_string()).or_default();
        samples.count += 1;
        if success {
            samples.durations_ms.push_back(ms);
            if samples.durations_ms.len() > SAMPLE_WINDOW {
                samples.durations_ms.pop_front();
            }
        } else {
            samples.errors += 1;
        }
    }

    /// Statistics for one operation, if any samples were recorded
    pub fn report_for(&self, operation: &str) -> Option<OpStats> {
        let ops = self.ops.read();
        ops.get(operation).map(|s| Self::stats_for(operation, s))
    }

    /// Statistics for every recorded operation
    pub fn report(&self) -> Vec<OpStats> {
        let ops = self.ops.read();
        let mut stats: Vec<OpStats> = ops
            .iter()
            .map(|(name, s)| Self::stats_for(name, s))
            .collect();
        stats.sort_by(|a, b| a.operation.cmp(&b.operation));
        stats
    }

    /// Overall error rate across all operations, as a fraction
    pub fn overall_error_rate(&self) -> f64 {
        let ops = self.ops.read();
        let (count, errors) = ops
            .values()
            .fold((0u64, 0u64), |(c, e), s| (c + s.count, e + s.errors));
        if count == 0 {
            0.0
        } else {
            errors as f64 / count as f64
        }
    }

    /// Worst p95 latency across all operations, in milliseconds
    pub fn worst_p95_ms(&self) -> f64 {
        self.report()
            .into_iter()
            .map(|s| s.p95_ms)
            .fold(0.0, f64::max)
    }

    /// Rule-based optimization hints
    pub fn recommendations(&self) -> Vec<Recommendation> {
        let mut recs = Vec::new();

        for stats in self.report() {
            if stats.error_rate > 0.05 {
                recs.push(Recommendation {
                    operation: stats.operation.clone(),
                    severity: RecommendationSeverity::High,
                    message: format!(
                        "Operation '{}' has a {:.1}% error rate",
                        stats.operation,
                        stats.error_rate * 100.0
                    ),
                });
            }
            if stats.avg_ms > SLOW_OPERATION_MS {
                recs.push(Recommendation {
                    operation: stats.operation.clone(),
                    severity: if stats.avg_ms > 5000.0 {
                        RecommendationSeverity::High
                    } else {
                        RecommendationSeverity::Medium
                    },
                    message: format!(
                        "Operation '{}' averaging {:.0}ms, consider optimization",
                        stats.operation, stats.avg_ms
                    ),
                });
            }
        }

        recs
    }

    /// Persist a snapshot of the current aggregates
    pub fn save(&self) -> Result<()> {
        #[derive(Serialize)]
        struct Snapshot {
            timestamp: chrono::DateTime<Utc>,
            operations: Vec<OpStats>,
        }

        let snapshot = Snapshot {
            timestamp: Utc::now(),
            operations: self.report(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.snapshot_path, &bytes)
    }

    fn stats_for(name: &str, samples: &OpSamples) -> OpStats {
        let durations = &samples.durations_ms;
        let (avg, min, max, p95) = if durations.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let sum: f64 = durations.iter().sum();
            let avg = sum / durations.len() as f64;
            let min = durations.iter().copied().fold(f64::INFINITY, f64::min);
            let max = durations.iter().copied().fold(0.0, f64::max);

            let mut sorted: Vec<f64> = durations.iter().copied().collect();
            sorted.sort_by(f64::total_cmp);
            let idx = ((sorted.len() as f64) * 0.95) as usize;
            let p95 = sorted[idx.min(sorted.len() - 1)];

            (avg, min, max, p95)
        };

        OpStats {
            operation: name.to_string(),
            count: samples.count,
            errors: samples.errors,
            error_rate: if samples.count == 0 {
                0.0
            } else {
                samples.errors as f64 / samples.count as f64
            },
            avg_ms: avg,
            min_ms: min,
            max_ms: max,
            p95_ms: p95,
        }
    }
}

/// Helper for timing operations against a recorder
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record to the given recorder and return the elapsed duration
    pub fn record(self, recorder: &PerformanceRecorder, operation: &str, success: bool) -> Duration {
        let elapsed = self.elapsed();
        recorder.record(operation, elapsed, success);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn recorder() -> (PerformanceRecorder, TempDir) {
        let dir = TempDir::new().unwrap();
        let rec = PerformanceRecorder::new(dir.path().join("perf.json"));
        (rec, dir)
    }

    #[test]
    fn test_record_and_report() {
        let (rec, _dir) = recorder();
        rec.record("search", Duration::from_millis(10), true);
        rec.record("search", Duration::from_millis(20), true);
        rec.record("search", Duration::from_millis(30), true);

        let stats = rec.report_for("search").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.errors, 0);
        assert!((stats.avg_ms - 20.0).abs() < 1.0);
        assert!(stats.min_ms >= 9.0 && stats.min_ms <= 11.0);
        assert!(stats.max_ms >= 29.0 && stats.max_ms <= 31.0);
    }

    #[test]
    fn test_error_rate() {
        let (rec, _dir) = recorder();
        for _ in 0..9 {
            rec.record("embed", Duration::from_millis(5), true);
        }
        rec.record("embed", Duration::from_millis(5), false);

        let stats = rec.report_for("embed").unwrap();
        assert_eq!(stats.count, 10);
        assert_eq!(stats.errors, 1);
        assert!((stats.error_rate - 0.1).abs() < f64::EPSILON);
        assert!((rec.overall_error_rate() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_p95() {
        let (rec, _dir) = recorder();
        for i in 1..=100 {
            rec.record("op", Duration::from_millis(i), true);
        }
        let stats = rec.report_for("op").unwrap();
        // 95th percentile of 1..=100 ms
        assert!(stats.p95_ms >= 95.0 && stats.p95_ms <= 97.0);
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let (rec, _dir) = recorder();
        for _ in 0..(SAMPLE_WINDOW + 500) {
            rec.record("op", Duration::from_millis(1), true);
        }
        let stats = rec.report_for("op").unwrap();
        // Count keeps the full total even though the window is bounded
        assert_eq!(stats.count, (SAMPLE_WINDOW + 500) as u64);
        let ops = rec.ops.read();
        assert_eq!(ops.get("op").unwrap().durations_ms.len(), SAMPLE_WINDOW);
    }

    #[test]
    fn test_recommendations_high_error_rate() {
        let (rec, _dir) = recorder();
        for _ in 0..9 {
            rec.record("flaky", Duration::from_millis(5), true);
        }
        rec.record("flaky", Duration::from_millis(5), false);

        let recs = rec.recommendations();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, RecommendationSeverity::High);
        assert!(recs[0].message.contains("error rate"));
    }

    #[test]
    fn test_recommendations_slow_operation() {
        let (rec, _dir) = recorder();
        rec.record("slow", Duration::from_millis(2000), true);

        let recs = rec.recommendations();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, RecommendationSeverity::Medium);

        rec.record("slow", Duration::from_millis(20_000), true);
        let recs = rec.recommendations();
        assert_eq!(recs[0].severity, RecommendationSeverity::High);
    }

    #[test]
    fn test_no_recommendations_when_healthy() {
        let (rec, _dir) = recorder();
        for _ in 0..100 {
            rec.record("fast", Duration::from_millis(5), true);
        }
        assert!(rec.recommendations().is_empty());
    }

    #[test]
    fn test_save_writes_snapshot() {
        let (rec, dir) = recorder();
        rec.record("op", Duration::from_millis(5), true);
        rec.save().unwrap();

        let content = std::fs::read_to_string(dir.path().join("perf.json")).unwrap();
        assert!(content.contains("\"operation\": \"op\""));
    }

    #[test]
    fn test_timer_records() {
        let (rec, _dir) = recorder();
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = timer.record(&rec, "timed", true);

        assert!(elapsed.as_millis() >= 5);
        assert_eq!(rec.report_for("timed").unwrap().count, 1);
    }
}
