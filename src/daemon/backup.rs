//! Index backup and retention
//!
//! Snapshots the index+metadata file pair into timestamped directories
//! before every destructive mutation, with strict FIFO retention. Restore
//! first snapshots the current state so a bad restore is itself
//! reversible, then verifies restored file sizes against the manifest.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::util::{atomic_write, file_size};

/// File names inside each backup directory
const BACKUP_INDEX_FILE: &str = "index.bin";
const BACKUP_METADATA_FILE: &str = "metadata.json";

/// Manifest file name in the backup root
const MANIFEST_FILE: &str = "backups.json";

/// A single backup entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub index_size: u64,
    pub metadata_size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    /// Creation order, oldest first
    backups: Vec<BackupInfo>,
}

/// Manages snapshots of the index and metadata files.
///
/// All operations are sequenced through an internal lock: a backup is
/// never created while a restore is rewriting the same files.
pub struct BackupManager {
    backup_dir: PathBuf,
    max_backups: usize,
    state: Mutex<Manifest>,
}

impl BackupManager {
    /// Open or create a backup directory
    pub fn new(backup_dir: PathBuf, max_backups: usize) -> Result<Self> {
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed to create backup dir {}", backup_dir.display()))?;

        let manifest_path = backup_dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            let data = fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&data).context("Failed to parse backup manifest")?
        } else {
            Manifest::default()
        };

        Ok(Self {
            backup_dir,
            max_backups,
            state: Mutex::new(manifest),
        })
    }

    /// Snapshot the given index and metadata files.
    ///
    /// Returns the new backup id. Evicts the oldest backup when the
    /// retention limit is exceeded.
    pub fn create(
        &self,
        index_path: &Path,
        metadata_path: &Path,
        description: &str,
    ) -> Result<String> {
        let mut manifest = self.state.lock();
        self.create_locked(&mut manifest, index_path, metadata_path, description, None)
    }

    /// List backups, newest first
    pub fn list(&self) -> Vec<BackupInfo> {
        let manifest = self.state.lock();
        let mut backups = manifest.backups.clone();
        backups.reverse();
        backups
    }

    /// Look up one backup
    pub fn get(&self, backup_id: &str) -> Option<BackupInfo> {
        let manifest = self.state.lock();
        manifest.backups.iter().find(|b| b.id == backup_id).cloned()
    }

    /// Restore a backup over the live index and metadata files.
    ///
    /// The current state is snapshotted first, then the backup contents are
    /// copied into place and the restored file sizes are verified against
    /// the manifest.
    pub fn restore(
        &self,
        backup_id: &str,
        index_path: &Path,
        metadata_path: &Path,
    ) -> Result<()> {
        let mut manifest = self.state.lock();

        let info = manifest
            .backups
            .iter()
            .find(|b| b.id == backup_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Backup {} not found", backup_id))?;

        info!("Restoring backup {} from {}", backup_id, info.created_at);

        // Safety backup of the current state so the restore is reversible.
        // Retention must not evict the backup we are about to copy from.
        if index_path.exists() || metadata_path.exists() {
            self.create_locked(
                &mut manifest,
                index_path,
                metadata_path,
                &format!("Pre-restore safety backup before restoring {}", backup_id),
                Some(backup_id),
            )?;
        }

        let backup_subdir = self.backup_dir.join(backup_id);
        let backup_index = backup_subdir.join(BACKUP_INDEX_FILE);
        let backup_metadata = backup_subdir.join(BACKUP_METADATA_FILE);

        if backup_index.exists() {
            fs::copy(&backup_index, index_path)
                .with_context(|| format!("Failed to restore index from {}", backup_id))?;
        }
        if backup_metadata.exists() {
            fs::copy(&backup_metadata, metadata_path)
                .with_context(|| format!("Failed to restore metadata from {}", backup_id))?;
        }

        // Verify the restored files match what the manifest recorded
        if backup_index.exists() && file_size(index_path) != info.index_size {
            anyhow::bail!(
                "Restore verification failed: index size {} != recorded {}",
                file_size(index_path),
                info.index_size
            );
        }
        if backup_metadata.exists() && file_size(metadata_path) != info.metadata_size {
            anyhow::bail!(
                "Restore verification failed: metadata size {} != recorded {}",
                file_size(metadata_path),
                info.metadata_size
            );
        }

        info!("Backup {} restored successfully", backup_id);
        Ok(())
    }

    /// Delete a backup and its files
    pub fn delete(&self, backup_id: &str) -> Result<()> {
        let mut manifest = self.state.lock();
        Self::delete_locked(&self.backup_dir, &mut manifest, backup_id)?;
        self.save_manifest(&manifest)
    }

    /// Number of retained backups
    pub fn count(&self) -> usize {
        self.state.lock().backups.len()
    }

    fn create_locked(
        &self,
        manifest: &mut Manifest,
        index_path: &Path,
        metadata_path: &Path,
        description: &str,
        retention_exempt: Option<&str>,
    ) -> Result<String> {
        let backup_id = self.unique_id(manifest);
        let backup_subdir = self.backup_dir.join(&backup_id);
        fs::create_dir_all(&backup_subdir)?;

        info!("Creating backup {}", backup_id);

        let result = (|| -> Result<BackupInfo> {
            let mut index_size = 0;
            if index_path.exists() {
                fs::copy(index_path, backup_subdir.join(BACKUP_INDEX_FILE))
                    .context("Failed to copy index file")?;
                index_size = file_size(index_path);
            } else {
                warn!("Index file not found: {}", index_path.display());
            }

            let mut metadata_size = 0;
            if metadata_path.exists() {
                fs::copy(metadata_path, backup_subdir.join(BACKUP_METADATA_FILE))
                    .context("Failed to copy metadata file")?;
                metadata_size = file_size(metadata_path);
            } else {
                warn!("Metadata file not found: {}", metadata_path.display());
            }

            Ok(BackupInfo {
                id: backup_id.clone(),
                created_at: Utc::now(),
                description: description.to_string(),
                index_size,
                metadata_size,
            })
        })();

        let info = match result {
            Ok(info) => info,
            Err(e) => {
                // Remove the partial backup directory
                let _ = fs::remove_dir_all(&backup_subdir);
                return Err(e);
            }
        };

        manifest.backups.push(info);
        self.enforce_retention(manifest, retention_exempt);
        self.save_manifest(manifest)?;

        info!("Backup {} created successfully", backup_id);
        Ok(backup_id)
    }

    /// Evict oldest backups beyond the retention limit, oldest first.
    /// `exempt` protects a backup mid-restore from being evicted.
    fn enforce_retention(&self, manifest: &mut Manifest, exempt: Option<&str>) {
        while manifest.backups.len() > self.max_backups {
            let victim = manifest
                .backups
                .iter()
                .map(|b| b.id.clone())
                .find(|id| Some(id.as_str()) != exempt);

            match victim {
                Some(id) => {
                    info!("Retention limit reached, removing oldest backup {}", id);
                    if let Err(e) = Self::delete_locked(&self.backup_dir, manifest, &id) {
                        warn!("Failed to remove old backup {}: {}", id, e);
                        break;
                    }
                }
                None => break,
            }
        }
    }

    fn delete_locked(backup_dir: &Path, manifest: &mut Manifest, backup_id: &str) -> Result<()> {
        let pos = manifest
            .backups
            .iter()
            .position(|b| b.id == backup_id)
            .ok_or_else(|| anyhow::anyhow!("Backup {} not found", backup_id))?;

        let subdir = backup_dir.join(backup_id);
        if subdir.exists() {
            fs::remove_dir_all(&subdir)
                .with_context(|| format!("Failed to delete backup dir {}", subdir.display()))?;
        }

        manifest.backups.remove(pos);
        info!("Backup {} deleted", backup_id);
        Ok(())
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        atomic_write(&self.backup_dir.join(MANIFEST_FILE), &bytes)
    }

    /// Timestamp-derived id, suffixed when two backups land in the same second
    fn unique_id(&self, manifest: &Manifest) -> String {
        let base = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        if !manifest.backups.iter().any(|b| b.id == base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !manifest.backups.iter().any(|b| b.id == candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        manager: BackupManager,
        index_path: PathBuf,
        metadata_path: PathBuf,
    }

    fn fixture(max_backups: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("cases.index");
        let metadata_path = dir.path().join("cases.meta.json");
        fs::write(&index_path, b"index-v1").unwrap();
        fs::write(&metadata_path, b"meta-v1").unwrap();

        let manager = BackupManager::new(dir.path().join("backups"), max_backups).unwrap();
        Fixture {
            _dir: dir,
            manager,
            index_path,
            metadata_path,
        }
    }

    #[test]
    fn test_create_and_list() {
        let f = fixture(5);
        let id = f
            .manager
            .create(&f.index_path, &f.metadata_path, "first")
            .unwrap();

        let backups = f.manager.list();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].id, id);
        assert_eq!(backups[0].description, "first");
        assert_eq!(backups[0].index_size, 8);
        assert_eq!(backups[0].metadata_size, 7);
    }

    #[test]
    fn test_retention_evicts_oldest_fifo() {
        let f = fixture(5);
        let mut ids = Vec::new();
        for i in 1..=6 {
            let id = f
                .manager
                .create(&f.index_path, &f.metadata_path, &format!("b{}", i))
                .unwrap();
            ids.push(id);
        }

        assert_eq!(f.manager.count(), 5);
        let remaining: Vec<String> = f.manager.list().into_iter().map(|b| b.id).collect();
        // b1 evicted, b2..b6 remain
        assert!(!remaining.contains(&ids[0]));
        for id in &ids[1..] {
            assert!(remaining.contains(id));
        }
        // The evicted backup's directory is gone too
        assert!(!f.manager.backup_dir.join(&ids[0]).exists());
    }

    #[test]
    fn test_restore_roundtrip() {
        let f = fixture(5);
        let id = f
            .manager
            .create(&f.index_path, &f.metadata_path, "clean state")
            .unwrap();

        // Overwrite the live files, then restore
        fs::write(&f.index_path, b"corrupted-index-content").unwrap();
        fs::write(&f.metadata_path, b"corrupted-meta").unwrap();

        f.manager
            .restore(&id, &f.index_path, &f.metadata_path)
            .unwrap();

        assert_eq!(fs::read(&f.index_path).unwrap(), b"index-v1");
        assert_eq!(fs::read(&f.metadata_path).unwrap(), b"meta-v1");
    }

    #[test]
    fn test_restore_creates_safety_backup() {
        let f = fixture(5);
        let id = f
            .manager
            .create(&f.index_path, &f.metadata_path, "clean state")
            .unwrap();

        fs::write(&f.index_path, b"newer-state").unwrap();
        f.manager
            .restore(&id, &f.index_path, &f.metadata_path)
            .unwrap();

        // One original backup plus the pre-restore safety backup
        assert_eq!(f.manager.count(), 2);
        let newest = &f.manager.list()[0];
        assert!(newest.description.contains("Pre-restore safety backup"));
    }

    #[test]
    fn test_restore_unknown_id_fails() {
        let f = fixture(5);
        let err = f
            .manager
            .restore("20990101_000000", &f.index_path, &f.metadata_path)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_delete() {
        let f = fixture(5);
        let id = f
            .manager
            .create(&f.index_path, &f.metadata_path, "doomed")
            .unwrap();
        assert_eq!(f.manager.count(), 1);

        f.manager.delete(&id).unwrap();
        assert_eq!(f.manager.count(), 0);
        assert!(!f.manager.backup_dir.join(&id).exists());
    }

    #[test]
    fn test_ids_unique_within_same_second() {
        let f = fixture(10);
        let a = f
            .manager
            .create(&f.index_path, &f.metadata_path, "one")
            .unwrap();
        let b = f
            .manager
            .create(&f.index_path, &f.metadata_path, "two")
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_manifest_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("cases.index");
        let metadata_path = dir.path().join("cases.meta.json");
        fs::write(&index_path, b"index").unwrap();
        fs::write(&metadata_path, b"meta").unwrap();
        let backup_dir = dir.path().join("backups");

        let id = {
            let manager = BackupManager::new(backup_dir.clone(), 5).unwrap();
            manager.create(&index_path, &metadata_path, "persisted").unwrap()
        };

        let manager = BackupManager::new(backup_dir, 5).unwrap();
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.get(&id).unwrap().description, "persisted");
    }
}
