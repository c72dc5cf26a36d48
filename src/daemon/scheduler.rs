//! Job Scheduler
//!
//! Owns the job registry and a single background timing loop that checks
//! all enabled jobs at a fixed poll granularity and invokes the sync
//! engine for due ones. Exactly one execution per job id may be in flight;
//! manual triggers during a run are rejected, not queued.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::util::atomic_write;

use super::sync::SyncEngine;

/// Jobs file name in the data directory
pub const JOBS_FILE: &str = "jobs.json";

/// How often the timing loop checks for due jobs
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Schedule descriptor, a closed set of variants. Unknown variants are
/// rejected at the serde boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum Schedule {
    /// Run every `minutes` minutes after the previous run
    Interval { minutes: u32 },
    /// Run daily at "HH:MM" UTC
    Daily { time: String },
    /// Run at every match of a cron expression
    Cron { expression: String },
}

impl Schedule {
    /// Reject invalid schedules at the configuration boundary
    pub fn validate(&self) -> Result<(), SyncError> {
        match self {
            Self::Interval { minutes } => {
                if *minutes == 0 {
                    return Err(SyncError::Config(
                        "interval minutes must be positive".to_string(),
                    ));
                }
            }
            Self::Daily { time } => {
                NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| {
                    SyncError::Config(format!("invalid daily time '{}', expected HH:MM", time))
                })?;
            }
            Self::Cron { expression } => {
                cron::Schedule::from_str(expression).map_err(|e| {
                    SyncError::Config(format!("invalid cron expression '{}': {}", expression, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// A scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub schedule: Schedule,
    pub enabled: bool,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobsFile {
    jobs: Vec<Job>,
}

/// Compute the next run time for a schedule, strictly after `last_run`
/// when one exists. A never-run interval job is due immediately.
pub fn next_run_after(
    schedule: &Schedule,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Interval { minutes } => Some(match last_run {
            Some(t) => t + chrono::Duration::minutes(*minutes as i64),
            None => now,
        }),
        Schedule::Daily { time } => {
            let tod = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
            let after = last_run.unwrap_or(now);
            let candidate = after.date_naive().and_time(tod).and_utc();
            Some(if candidate > after {
                candidate
            } else {
                candidate + chrono::Duration::days(1)
            })
        }
        Schedule::Cron { expression } => {
            let sched = cron::Schedule::from_str(expression).ok()?;
            let after = last_run.unwrap_or(now);
            sched.after(&after).next()
        }
    }
}

/// A job is due when its time has come, it is enabled, and no execution
/// is in flight
fn is_due(job: &Job, now: DateTime<Utc>) -> bool {
    job.enabled
        && job.status != JobStatus::Running
        && job.next_run.map(|t| now >= t).unwrap_or(false)
}

/// Process-scoped scheduler service with an explicit start/stop lifecycle
pub struct Scheduler {
    /// Shared with spawned job tasks, which update status on completion
    jobs: Arc<DashMap<String, Job>>,
    engine: Arc<SyncEngine>,
    jobs_path: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    /// Create the scheduler, loading persisted jobs or seeding the default
    /// sync job
    pub fn new(
        engine: Arc<SyncEngine>,
        data_dir: &std::path::Path,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let jobs_path = data_dir.join(JOBS_FILE);
        let jobs = Arc::new(DashMap::new());

        let loaded = Self::load_jobs(&jobs_path);
        if loaded.is_empty() {
            let default_job = Job {
                id: "case_sync".to_string(),
                name: "Case Data Sync".to_string(),
                schedule: Schedule::Interval { minutes: 60 },
                enabled: true,
                status: JobStatus::Idle,
                last_run: None,
                next_run: None,
                last_error: None,
            };
            jobs.insert(default_job.id.clone(), default_job);
        } else {
            for mut job in loaded {
                // A run cannot survive a process restart
                if job.status == JobStatus::Running {
                    job.status = JobStatus::Idle;
                }
                jobs.insert(job.id.clone(), job);
            }
        }

        let scheduler = Self {
            jobs,
            engine,
            jobs_path,
            shutdown_tx,
        };
        scheduler.persist();
        scheduler
    }

    /// Register a new job. Its schedule is validated first.
    pub fn register(&self, job: Job) -> Result<(), SyncError> {
        job.schedule.validate()?;
        if self.jobs.contains_key(&job.id) {
            return Err(SyncError::Config(format!(
                "job '{}' already registered",
                job.id
            )));
        }
        info!("Registered job '{}' ({:?})", job.id, job.schedule);
        self.jobs.insert(job.id.clone(), job);
        self.persist();
        Ok(())
    }

    /// Update a job's enabled flag and optionally its schedule.
    ///
    /// Invalid schedules are rejected and the prior configuration is
    /// retained. Changes persist immediately and take effect on the next
    /// due evaluation; an in-flight run is not interrupted.
    pub fn update_schedule(
        &self,
        job_id: &str,
        enabled: bool,
        schedule: Option<Schedule>,
    ) -> Result<Job, SyncError> {
        if let Some(ref schedule) = schedule {
            schedule.validate()?;
        }

        let updated = {
            let mut entry = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| SyncError::Config(format!("unknown job '{}'", job_id)))?;
            entry.enabled = enabled;
            if let Some(schedule) = schedule {
                entry.schedule = schedule;
                entry.next_run = next_run_after(&entry.schedule, entry.last_run, Utc::now());
            }
            entry.clone()
        };

        info!(
            "Updated job '{}': enabled={}, next_run={:?}",
            job_id, enabled, updated.next_run
        );
        self.persist();
        Ok(updated)
    }

    /// Manually trigger a job, bypassing the due check.
    ///
    /// Rejected with `SyncError::Conflict` while the job is running.
    pub fn trigger(&self, job_id: &str) -> Result<(), SyncError> {
        if !self.jobs.contains_key(job_id) {
            return Err(SyncError::Config(format!("unknown job '{}'", job_id)));
        }
        info!("Manually triggering job '{}'", job_id);
        self.start_run(job_id, Utc::now())
    }

    /// All jobs, sorted by id
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|r| r.value().clone()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Look up one job
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).map(|r| r.value().clone())
    }

    /// Start the background timing loop. Runs until shutdown is signalled.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!("Scheduler loop started (poll every {:?})", POLL_INTERVAL);
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick(Utc::now());
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop stopping");
                        break;
                    }
                }
            }
        })
    }

    /// One pass of the timing loop: compute missing next_run values and
    /// start every due job
    pub fn tick(&self, now: DateTime<Utc>) {
        let mut due_jobs = Vec::new();
        let mut computed = false;

        for mut entry in self.jobs.iter_mut() {
            if entry.next_run.is_none() {
                entry.next_run = next_run_after(&entry.schedule, entry.last_run, now);
                computed = true;
            }
            if is_due(&entry, now) {
                due_jobs.push(entry.id.clone());
            }
        }
        if computed {
            self.persist();
        }

        for job_id in due_jobs {
            match self.start_run(&job_id, now) {
                Ok(()) => {}
                Err(SyncError::Conflict) => {
                    // A manual trigger got there first
                    warn!("Job '{}' already running, skipping tick", job_id);
                }
                Err(e) => error!("Failed to start job '{}': {}", job_id, e),
            }
        }
    }

    /// Mark the job running and spawn its execution. The status flip
    /// happens under the registry entry lock, so two callers can never
    /// both start the same job.
    fn start_run(&self, job_id: &str, now: DateTime<Utc>) -> Result<(), SyncError> {
        {
            let mut entry = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| SyncError::Config(format!("unknown job '{}'", job_id)))?;
            if entry.status == JobStatus::Running {
                return Err(SyncError::Conflict);
            }
            entry.status = JobStatus::Running;
            entry.last_run = Some(now);
            entry.next_run = next_run_after(&entry.schedule, Some(now), now);
        }
        self.persist();

        let jobs = Arc::clone(&self.jobs);
        let jobs_path = self.jobs_path.clone();
        let engine = Arc::clone(&self.engine);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            info!("Job '{}' starting", job_id);
            let result = engine.run().await;

            if let Some(mut entry) = jobs.get_mut(&job_id) {
                match result {
                    Ok(outcome) => {
                        entry.status = JobStatus::Completed;
                        entry.last_error = None;
                        info!(
                            "Job '{}' completed: {} cases added",
                            job_id, outcome.cases_added
                        );
                    }
                    Err(e) => {
                        entry.status = JobStatus::Failed;
                        entry.last_error = Some(e.to_string());
                        error!("Job '{}' failed: {}", job_id, e);
                    }
                }
            }
            persist_jobs(&jobs_path, &jobs);
        });

        Ok(())
    }

    fn persist(&self) {
        persist_jobs(&self.jobs_path, &self.jobs);
    }

    fn load_jobs(path: &std::path::Path) -> Vec<Job> {
        load_jobs_file(path)
    }
}

/// Write the registry to disk atomically, sorted by id
fn persist_jobs(path: &std::path::Path, jobs: &DashMap<String, Job>) {
    let mut list: Vec<Job> = jobs.iter().map(|r| r.value().clone()).collect();
    list.sort_by(|a, b| a.id.cmp(&b.id));
    let file = JobsFile { jobs: list };
    match serde_json::to_vec_pretty(&file) {
        Ok(bytes) => {
            if let Err(e) = atomic_write(path, &bytes) {
                error!("Failed to persist jobs: {}", e);
            }
        }
        Err(e) => error!("Failed to serialize jobs: {}", e),
    }
}

fn load_jobs_file(path: &std::path::Path) -> Vec<Job> {
    if !path.exists() {
        return Vec::new();
    }
    match std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|data| serde_json::from_str::<JobsFile>(&data).map_err(anyhow::Error::from))
    {
        Ok(file) => file.jobs,
        Err(e) => {
            error!("Failed to load jobs file, starting with defaults: {}", e);
            Vec::new()
        }
    }
}
