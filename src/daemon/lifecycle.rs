//! Daemon lifecycle management
//!
//! Handles startup, shutdown, and single-instance guarantees. Wires the
//! sync engine, scheduler, health monitor, and HTTP server together and
//! owns the shutdown broadcast channel.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedding::build_embedder;
use crate::quality::TextQuality;
use crate::source::{CaseSource, HttpCaseSource};

use super::backup::BackupManager;
use super::health::HealthMonitor;
use super::http::{AppState, HttpServer};
use super::index_manager::IndexManager;
use super::perf::PerformanceRecorder;
use super::scheduler::Scheduler;
use super::sync::SyncEngine;

/// PID file for single-instance guarantee
const PID_FILE_NAME: &str = "casedex.pid";

/// Performance snapshot file name
const PERF_SNAPSHOT_FILE: &str = "performance.json";

/// All wired core components
pub struct Components {
    pub source: Arc<dyn CaseSource>,
    pub index: Arc<IndexManager>,
    pub backups: Arc<BackupManager>,
    pub perf: Arc<PerformanceRecorder>,
    pub engine: Arc<SyncEngine>,
    pub scheduler: Arc<Scheduler>,
    pub health: Arc<HealthMonitor>,
}

impl Components {
    /// Build every component from the configuration
    pub fn init(config: &Config, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let data_dir = &config.node.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let source: Arc<dyn CaseSource> = Arc::new(HttpCaseSource::new(&config.source)?);
        let embedder = build_embedder(&config.embedding)?;
        info!(
            "Embedding backend: {} ({} dimensions)",
            embedder.name(),
            embedder.dimensions()
        );

        let index = Arc::new(IndexManager::load(
            data_dir,
            config.index.clone(),
            embedder.clone(),
        )?);
        let backups = Arc::new(BackupManager::new(
            config.backup_dir(),
            config.backup.max_backups,
        )?);
        let perf = Arc::new(PerformanceRecorder::new(data_dir.join(PERF_SNAPSHOT_FILE)));

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&source),
            embedder,
            TextQuality::default(),
            Arc::clone(&index),
            Arc::clone(&backups),
            Arc::clone(&perf),
            config.sync.clone(),
            data_dir,
        ));

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&engine),
            data_dir,
            shutdown_tx.clone(),
        ));

        let health = Arc::new(HealthMonitor::new(
            config.monitoring.clone(),
            Arc::clone(&index),
            Arc::clone(&engine),
            Arc::clone(&perf),
            Arc::clone(&source),
            Duration::from_secs(config.source.probe_ttl_secs),
            data_dir,
        ));

        Ok(Self {
            source,
            index,
            backups,
            perf,
            engine,
            scheduler,
            health,
        })
    }
}

/// Daemon instance managing all components
pub struct Daemon {
    config: Config,
    components: Components,
    shutdown_tx: broadcast::Sender<()>,
    pid_file_path: PathBuf,
    started_at: Instant,
}

impl Daemon {
    /// Start the daemon: acquire the instance lock and wire components
    pub fn start(config: Config) -> Result<Self> {
        info!("Starting casedex daemon");

        std::fs::create_dir_all(&config.node.data_dir)?;
        let pid_file_path = config.node.data_dir.join(PID_FILE_NAME);
        Self::acquire_lock(&pid_file_path)?;

        let (shutdown_tx, _) = broadcast::channel(16);
        let components = Components::init(&config, shutdown_tx.clone())?;

        info!("Daemon initialized");
        info!("Data directory: {}", config.node.data_dir.display());

        Ok(Self {
            config,
            components,
            shutdown_tx,
            pid_file_path,
            started_at: Instant::now(),
        })
    }

    /// Run the daemon until a shutdown signal arrives (blocking)
    pub async fn run(&self) -> Result<()> {
        info!("Daemon running");

        let scheduler_handle = Arc::clone(&self.components.scheduler).start();
        let health_handle = Arc::clone(&self.components.health).start(&self.shutdown_tx);

        let http_handle = if self.config.http.enabled {
            let app_state = AppState {
                scheduler: Arc::clone(&self.components.scheduler),
                engine: Arc::clone(&self.components.engine),
                index: Arc::clone(&self.components.index),
                health: Arc::clone(&self.components.health),
                perf: Arc::clone(&self.components.perf),
                backups: Arc::clone(&self.components.backups),
                started_at: self.started_at,
            };
            let server = HttpServer::new(self.config.http.clone(), app_state);
            let shutdown_rx = self.shutdown_tx.subscribe();

            info!("Starting HTTP API server on: {}", self.config.http.listen_addr);
            Some(tokio::spawn(async move {
                match server.run(shutdown_rx).await {
                    Ok(()) => info!("HTTP server shut down cleanly"),
                    Err(e) => error!("HTTP server failed: {}", e),
                }
            }))
        } else {
            None
        };

        // Wait for shutdown (Ctrl+C or SIGTERM)
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = Self::wait_for_sigterm() => {
                info!("Received SIGTERM, shutting down");
            }
        }

        let _ = self.shutdown_tx.send(());

        // Give the loops a bounded window to stop
        for (name, handle) in [("scheduler", scheduler_handle), ("health", health_handle)] {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("{} loop did not stop within 5s, aborting", name);
                abort.abort();
            }
        }
        if let Some(handle) = http_handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("HTTP server did not stop within 5s, aborting");
                abort.abort();
            }
        }

        self.shutdown()?;
        Ok(())
    }

    /// Final cleanup: persist aggregates and release the instance lock
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down daemon");

        if let Err(e) = self.components.perf.save() {
            warn!("Failed to save performance snapshot during shutdown: {}", e);
        }

        Self::release_lock(&self.pid_file_path)?;
        info!("Daemon shutdown complete");
        Ok(())
    }

    /// Access the wired components
    pub fn components(&self) -> &Components {
        &self.components
    }

    /// Acquire single-instance lock via PID file.
    ///
    /// Uses `create_new(true)` for atomic creation to avoid TOCTOU races
    /// where two processes could interleave exists/read/remove/create.
    fn acquire_lock(pid_file_path: &Path) -> Result<()> {
        use std::fs::OpenOptions;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(pid_file_path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File exists, check staleness below
            }
            Err(e) => {
                return Err(e).context("Failed to create PID file");
            }
        }

        let mut file = File::open(pid_file_path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        if let Ok(pid) = contents.trim().parse::<u32>() {
            if Self::process_exists(pid) {
                anyhow::bail!(
                    "Daemon is already running (PID {}). Stop it first or remove {}",
                    pid,
                    pid_file_path.display()
                );
            }
        }

        // Stale PID file, remove and retry once
        std::fs::remove_file(pid_file_path)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(pid_file_path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(())
            }
            Err(e) => Err(e).context("Failed to create PID file after removing stale lock"),
        }
    }

    /// Release single-instance lock
    fn release_lock(pid_file_path: &Path) -> Result<()> {
        if pid_file_path.exists() {
            std::fs::remove_file(pid_file_path)?;
        }
        Ok(())
    }

    /// Check if a process with the given PID exists
    fn process_exists(pid: u32) -> bool {
        #[cfg(unix)]
        {
            // Signal 0 performs the existence check without sending anything
            unsafe { libc::kill(pid as i32, 0) == 0 }
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            true
        }
    }

    /// Wait for SIGTERM
    #[cfg(unix)]
    async fn wait_for_sigterm() {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}. Falling back to pending future.", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() {
        std::future::pending::<()>().await
    }
}

/// Check if the daemon is running in the given data directory
pub fn is_daemon_running(data_dir: &Path) -> bool {
    let pid_file_path = data_dir.join(PID_FILE_NAME);

    if !pid_file_path.exists() {
        return false;
    }

    if let Ok(mut file) = File::open(&pid_file_path) {
        let mut contents = String::new();
        if file.read_to_string(&mut contents).is_ok() {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                return Daemon::process_exists(pid);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_lock_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");

        Daemon::acquire_lock(&pid_path).unwrap();
        assert!(pid_path.exists());

        // A second acquire fails while our own process holds the lock
        assert!(Daemon::acquire_lock(&pid_path).is_err());

        Daemon::release_lock(&pid_path).unwrap();
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_stale_pid_file_is_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");

        // Write a PID that can't be a live process
        std::fs::write(&pid_path, "999999999\n").unwrap();
        Daemon::acquire_lock(&pid_path).unwrap();

        let contents = std::fs::read_to_string(&pid_path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_is_daemon_running() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!is_daemon_running(temp_dir.path()));
    }
}
