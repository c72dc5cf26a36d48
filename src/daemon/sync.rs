//! Sync Engine
//!
//! Orchestrates one synchronization pass against the upstream case
//! repository: extract, filter, embed, backup, merge. The on-disk index
//! after a run is always either the pre-run state or the fully-merged
//! post-run state. Any failure after the pre-update backup restores that
//! backup and reloads the in-memory index from the restored files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::embedding::Embedder;
use crate::error::{retry_with_backoff, SyncError};
use crate::quality::{FilterStats, TextQuality};
use crate::source::CaseSource;
use crate::types::{CaseMeta, CaseRecord, Embedding};
use crate::util::atomic_write;

use super::backup::BackupManager;
use super::index_manager::IndexManager;
use super::perf::{PerformanceRecorder, Timer};

/// Sync state file name in the data directory
pub const SYNC_STATE_FILE: &str = "sync_state.json";

/// Persistent synchronization state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync_time: Option<DateTime<Utc>>,
    /// End of the last successfully merged window. The next run re-covers
    /// everything after this point (minus overlap).
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub total_cases_synced: u64,
    /// Vector count reported by the index manager after the last
    /// successful merge
    pub total_cases_in_index: u64,
    /// Bounded run history, most recent first
    #[serde(default)]
    pub sync_history: Vec<SyncHistoryEntry>,
}

/// One entry in the sync history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub cases_processed: usize,
    pub cases_added: usize,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of a completed sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub run_id: Uuid,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub cases_extracted: usize,
    /// Records surviving validation and dedupe
    pub cases_processed: usize,
    pub cases_added: usize,
    pub filter: FilterStats,
    pub backup_id: Option<String>,
    pub duration_ms: u64,
}

struct MergeInput {
    items: Vec<(CaseMeta, Embedding)>,
    extracted: usize,
    filter: FilterStats,
}

/// The incremental synchronization engine
pub struct SyncEngine {
    source: Arc<dyn CaseSource>,
    embedder: Arc<dyn Embedder>,
    quality: TextQuality,
    index: Arc<IndexManager>,
    backups: Arc<BackupManager>,
    perf: Arc<PerformanceRecorder>,
    config: SyncConfig,
    state_path: PathBuf,
    state: RwLock<SyncState>,
    /// Guards against overlapping runs; a second run is rejected, not queued
    run_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Create the engine, loading persisted sync state from the data dir
    pub fn new(
        source: Arc<dyn CaseSource>,
        embedder: Arc<dyn Embedder>,
        quality: TextQuality,
        index: Arc<IndexManager>,
        backups: Arc<BackupManager>,
        perf: Arc<PerformanceRecorder>,
        config: SyncConfig,
        data_dir: &std::path::Path,
    ) -> Self {
        let state_path = data_dir.join(SYNC_STATE_FILE);
        let state = Self::load_state(&state_path);

        Self {
            source,
            embedder,
            quality,
            index,
            backups,
            perf,
            config,
            state_path,
            state: RwLock::new(state),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot of the current sync state
    pub fn state(&self) -> SyncState {
        self.state.read().clone()
    }

    /// Most recent history entries, newest first
    pub fn history(&self, limit: usize) -> Vec<SyncHistoryEntry> {
        let state = self.state.read();
        state.sync_history.iter().take(limit).cloned().collect()
    }

    /// The extraction window the next run would use
    pub fn compute_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let last = self.state.read().last_successful_sync;
        extraction_window(
            last,
            now,
            self.config.overlap_minutes,
            self.config.initial_window_days,
        )
    }

    /// Execute one synchronization pass.
    ///
    /// Rejected with `SyncError::Conflict` if a run is already in flight.
    /// The overall timeout expires into the same failure path as any other
    /// fatal error, including rollback.
    pub async fn run(&self) -> Result<SyncOutcome, SyncError> {
        let _guard = self.run_lock.try_lock().map_err(|_| SyncError::Conflict)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = Instant::now();
        let (from, to) = self.compute_window(started_at);

        info!(
            "Sync run {} starting: window {} .. {}",
            run_id, from, to
        );

        // The backup id must survive a timeout of the inner future, so it
        // lives outside of it.
        let backup_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let timeout = Duration::from_secs(self.config.run_timeout_secs);
        let result = match tokio::time::timeout(
            timeout,
            self.execute(from, to, Arc::clone(&backup_slot)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(timeout)),
        };

        let duration_ms = timer.elapsed().as_millis() as u64;
        let backup_id = backup_slot.lock().clone();

        match result {
            Ok(merged) => {
                let added = merged.items.len();
                self.record_success(started_at, to, &merged, duration_ms);
                self.perf
                    .record("sync.run", timer.elapsed(), true);
                info!(
                    "Sync run {} completed: {} extracted, {} added in {}ms",
                    run_id, merged.extracted, added, duration_ms
                );
                Ok(SyncOutcome {
                    run_id,
                    window_start: from,
                    window_end: to,
                    cases_extracted: merged.extracted,
                    cases_processed: merged.items.len(),
                    cases_added: added,
                    filter: merged.filter,
                    backup_id,
                    duration_ms,
                })
            }
            Err(e) => {
                error!("Sync run {} failed: {}", run_id, e);
                // Unconditional rollback once the pre-update backup exists
                if let Some(ref id) = backup_id {
                    self.rollback(id);
                }
                self.record_failure(started_at, &e, duration_ms);
                self.perf.record("sync.run", timer.elapsed(), false);
                Err(e)
            }
        }
    }

    /// Restore a backup over the live index and reload it.
    ///
    /// Sequenced with sync runs through the same lock: a restore is
    /// rejected while a run is in flight, and vice versa.
    pub async fn restore_backup(&self, backup_id: &str) -> Result<(), SyncError> {
        let _guard = self.run_lock.try_lock().map_err(|_| SyncError::Conflict)?;

        self.backups
            .restore(
                backup_id,
                self.index.index_path(),
                self.index.metadata_path(),
            )
            .map_err(|e| SyncError::Backup(e.to_string()))?;
        self.index
            .reload()
            .map_err(|e| SyncError::IndexWrite(e.to_string()))?;

        let mut state = self.state.write();
        state.total_cases_in_index = self.index.count() as u64;
        self.persist_state(&state);
        Ok(())
    }

    /// The pipeline stages. Everything before the backup leaves no trace;
    /// everything after it is covered by the rollback in `run`.
    async fn execute(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        backup_slot: Arc<Mutex<Option<String>>>,
    ) -> Result<MergeInput, SyncError> {
        // Stage 1: extract
        let extract_timer = Timer::start();
        let records = self.extract(from, to).await;
        extract_timer.record(&self.perf, "sync.extract", records.is_ok());
        let records = records?;
        let extracted = records.len();
        info!("Extracted {} candidate records", extracted);

        // Stage 2: validate, quality-filter, dedupe
        let filter_timer = Timer::start();
        let indexed_ids = self.index.indexed_ids();
        let (kept, filter) = self.quality.filter(records, &indexed_ids);
        filter_timer.record(&self.perf, "sync.filter", true);
        info!(
            "Filter kept {} of {} records ({} rejected)",
            kept.len(),
            extracted,
            filter.rejected()
        );

        if kept.is_empty() {
            return Ok(MergeInput {
                items: Vec::new(),
                extracted,
                filter,
            });
        }

        // Stage 3: embed in bounded batches
        let embed_timer = Timer::start();
        let items = self.embed(&kept).await;
        embed_timer.record(&self.perf, "sync.embed", items.is_ok());
        let items = items?;

        // Stage 4: pre-update safety backup. Skipped on the very first run
        // when there is nothing on disk to protect.
        let index_path = self.index.index_path().to_path_buf();
        let metadata_path = self.index.metadata_path().to_path_buf();
        if index_path.exists() || metadata_path.exists() {
            let backup_timer = Timer::start();
            let backup = self.backups.create(
                &index_path,
                &metadata_path,
                &format!("Pre-sync backup {}", to.to_rfc3339()),
            );
            backup_timer.record(&self.perf, "backup.create", backup.is_ok());
            let id = backup.map_err(|e| SyncError::Backup(e.to_string()))?;
            *backup_slot.lock() = Some(id);
        }

        // Stage 5: merge and persist atomically
        let merge_timer = Timer::start();
        let merge_result = self
            .index
            .add_records(&items)
            .and_then(|_| self.index.save());
        merge_timer.record(&self.perf, "sync.merge", merge_result.is_ok());
        merge_result.map_err(|e| SyncError::IndexWrite(e.to_string()))?;

        Ok(MergeInput {
            items,
            extracted,
            filter,
        })
    }

    async fn extract(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CaseRecord>, SyncError> {
        let base_delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let source = Arc::clone(&self.source);
            let page_cursor = cursor.clone();
            let page = retry_with_backoff(self.config.max_retries, base_delay, || {
                let source = Arc::clone(&source);
                let cursor = page_cursor.clone();
                async move { source.fetch_page(from, to, cursor).await }
            })
            .await?;

            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(records)
    }

    async fn embed(&self, records: &[CaseRecord]) -> Result<Vec<(CaseMeta, Embedding)>, SyncError> {
        let base_delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut items = Vec::with_capacity(records.len());

        for chunk in records.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = chunk.iter().map(|r| r.combined_text()).collect();
            let embedder = Arc::clone(&self.embedder);
            let vectors = retry_with_backoff(self.config.max_retries, base_delay, || {
                let embedder = Arc::clone(&embedder);
                let texts = texts.clone();
                async move { embedder.embed_batch(&texts).await }
            })
            .await?;

            if vectors.len() != chunk.len() {
                return Err(SyncError::Embedding(format!(
                    "batch returned {} vectors for {} records",
                    vectors.len(),
                    chunk.len()
                )));
            }

            for (record, vector) in chunk.iter().zip(vectors) {
                items.push((CaseMeta::from_record(record), vector));
            }
        }

        Ok(items)
    }

    /// Restore the pre-update backup and bring the in-memory index back in
    /// step with the restored files.
    fn rollback(&self, backup_id: &str) {
        warn!("Rolling back to pre-update backup {}", backup_id);
        if let Err(e) = self.backups.restore(
            backup_id,
            self.index.index_path(),
            self.index.metadata_path(),
        ) {
            error!("Rollback restore failed: {}", e);
            return;
        }
        if let Err(e) = self.index.reload() {
            error!("Index reload after rollback failed: {}", e);
            return;
        }
        info!("Rollback to backup {} complete", backup_id);
    }

    fn record_success(
        &self,
        started_at: DateTime<Utc>,
        window_end: DateTime<Utc>,
        merged: &MergeInput,
        duration_ms: u64,
    ) {
        let mut state = self.state.write();
        state.last_sync_time = Some(Utc::now());
        state.last_successful_sync = Some(window_end);
        state.total_cases_synced += merged.items.len() as u64;
        state.total_cases_in_index = self.index.count() as u64;
        Self::push_history(
            &mut state,
            self.config.history_limit,
            SyncHistoryEntry {
                timestamp: started_at,
                cases_processed: merged.items.len(),
                cases_added: merged.items.len(),
                duration_ms,
                success: true,
                error: None,
            },
        );
        self.persist_state(&state);
    }

    fn record_failure(&self, started_at: DateTime<Utc>, error: &SyncError, duration_ms: u64) {
        let mut state = self.state.write();
        state.last_sync_time = Some(Utc::now());
        // last_successful_sync stays untouched so the next run re-covers
        // the failed window
        Self::push_history(
            &mut state,
            self.config.history_limit,
            SyncHistoryEntry {
                timestamp: started_at,
                cases_processed: 0,
                cases_added: 0,
                duration_ms,
                success: false,
                error: Some(error.to_string()),
            },
        );
        self.persist_state(&state);
    }

    fn push_history(state: &mut SyncState, limit: usize, entry: SyncHistoryEntry) {
        state.sync_history.insert(0, entry);
        state.sync_history.truncate(limit);
    }

    fn persist_state(&self, state: &SyncState) {
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(e) = atomic_write(&self.state_path, &bytes) {
                    error!("Failed to persist sync state: {}", e);
                }
            }
            Err(e) => error!("Failed to serialize sync state: {}", e),
        }
    }

    fn load_state(path: &std::path::Path) -> SyncState {
        if !path.exists() {
            return SyncState::default();
        }
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|data| serde_json::from_str(&data).map_err(anyhow::Error::from))
        {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to load sync state, starting fresh: {}", e);
                SyncState::default()
            }
        }
    }
}

/// Compute the extraction window for a run.
///
/// The overlap re-covers the tail of the previous window so records missed
/// due to clock or commit skew are caught; dedupe by stable id keeps them
/// from being indexed twice. The first run reaches back a configured number
/// of days.
pub fn extraction_window(
    last_successful_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    overlap_minutes: i64,
    initial_window_days: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = match last_successful_sync {
        Some(t) => t - chrono::Duration::minutes(overlap_minutes),
        None => now - chrono::Duration::days(initial_window_days),
    };
    (from, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_applies_overlap() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();

        let (from, to) = extraction_window(Some(last), now, 5, 730);
        assert_eq!(from, Utc.with_ymd_and_hms(2023, 12, 31, 23, 55, 0).unwrap());
        assert_eq!(to, now);
    }

    #[test]
    fn test_window_first_run_reaches_back_initial_days() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let (from, to) = extraction_window(None, now, 5, 730);
        assert_eq!(from, now - chrono::Duration::days(730));
        assert_eq!(to, now);
    }

    #[test]
    fn test_history_is_bounded_most_recent_first() {
        let mut state = SyncState::default();
        for i in 0..5 {
            SyncEngine::push_history(
                &mut state,
                3,
                SyncHistoryEntry {
                    timestamp: Utc.with_ymd_and_hms(2024, 1, 1, i, 0, 0).unwrap(),
                    cases_processed: i as usize,
                    cases_added: i as usize,
                    duration_ms: 100,
                    success: true,
                    error: None,
                },
            );
        }

        assert_eq!(state.sync_history.len(), 3);
        // Most recent entry (hour 4) first
        assert_eq!(state.sync_history[0].cases_processed, 4);
        assert_eq!(state.sync_history[2].cases_processed, 2);
    }

    #[test]
    fn test_sync_state_roundtrips_through_json() {
        let state = SyncState {
            last_sync_time: Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()),
            last_successful_sync: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            total_cases_synced: 42,
            total_cases_in_index: 42,
            sync_history: vec![SyncHistoryEntry {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
                cases_processed: 42,
                cases_added: 42,
                duration_ms: 1234,
                success: true,
                error: None,
            }],
        };

        let json = serde_json::to_string(&state).unwrap();
        let parsed: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.total_cases_synced, 42);
        assert_eq!(parsed.sync_history.len(), 1);
        assert!(parsed.sync_history[0].success);
    }
}
