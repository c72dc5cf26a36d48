//! Case metadata storage
//!
//! Maps index keys to case metadata and case ids back to keys. Persisted
//! as a single JSON file next to the vector index so the pair can be
//! backed up and restored as discrete files.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{CaseId, CaseMeta};
use crate::util::atomic_write;

/// In-memory metadata store for the indexed cases
#[derive(Debug, Default)]
pub struct CaseMetadataStore {
    entries: HashMap<u64, CaseMeta>,
    id_to_key: HashMap<CaseId, u64>,
}

/// On-disk representation
#[derive(Serialize, Deserialize)]
struct SavedMetadata {
    entries: HashMap<u64, CaseMeta>,
}

impl CaseMetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from disk, or return an empty store if the file
    /// doesn't exist yet
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metadata file {}", path.display()))?;
        let saved: SavedMetadata = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse metadata file {}", path.display()))?;

        let id_to_key = saved
            .entries
            .iter()
            .map(|(&key, meta)| (meta.case_id.clone(), key))
            .collect();

        Ok(Self {
            entries: saved.entries,
            id_to_key,
        })
    }

    /// Persist the store atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let saved = SavedMetadata {
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec(&saved).context("Failed to serialize metadata")?;
        atomic_write(path, &bytes)
    }

    /// Insert metadata under an index key
    pub fn insert(&mut self, key: u64, meta: CaseMeta) {
        self.id_to_key.insert(meta.case_id.clone(), key);
        self.entries.insert(key, meta);
    }

    /// Look up metadata by index key
    pub fn get(&self, key: u64) -> Option<&CaseMeta> {
        self.entries.get(&key)
    }

    /// Whether a case id is already indexed
    pub fn contains_id(&self, case_id: &str) -> bool {
        self.id_to_key.contains_key(case_id)
    }

    /// All indexed case ids
    pub fn indexed_ids(&self) -> HashSet<CaseId> {
        self.id_to_key.keys().cloned().collect()
    }

    /// Number of metadata entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First key not yet in use; resumes vector key assignment after load
    pub fn next_key(&self) -> u64 {
        self.entries.keys().max().map(|k| k + 1).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn meta(case_id: &str) -> CaseMeta {
        CaseMeta {
            case_id: case_id.to_string(),
            case_number: format!("CN-{}", case_id),
            subject: "subject".to_string(),
            status: "Closed".to_string(),
            created_at: Utc::now(),
            preview: "preview".to_string(),
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = CaseMetadataStore::new();
        store.insert(0, meta("a"));
        store.insert(1, meta("b"));

        assert_eq!(store.len(), 2);
        assert!(store.contains_id("a"));
        assert!(!store.contains_id("c"));
        assert_eq!(store.get(1).unwrap().case_id, "b");
        assert_eq!(store.next_key(), 2);
    }

    #[test]
    fn test_next_key_on_empty_store() {
        let store = CaseMetadataStore::new();
        assert_eq!(store.next_key(), 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cases.meta.json");

        {
            let mut store = CaseMetadataStore::new();
            store.insert(0, meta("a"));
            store.insert(7, meta("b"));
            store.save(&path).unwrap();
        }

        {
            let store = CaseMetadataStore::load(&path).unwrap();
            assert_eq!(store.len(), 2);
            assert!(store.contains_id("a"));
            assert_eq!(store.get(7).unwrap().case_id, "b");
            // Resumes after the highest persisted key
            assert_eq!(store.next_key(), 8);
        }
    }

    #[test]
    fn test_load_missing_file_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = CaseMetadataStore::load(&dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_indexed_ids() {
        let mut store = CaseMetadataStore::new();
        store.insert(0, meta("x"));
        store.insert(1, meta("y"));
        let ids = store.indexed_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("x"));
        assert!(ids.contains("y"));
    }
}
