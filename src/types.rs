//! Core types for the casedex system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::truncate_str;

/// Stable identifier for a case in the upstream repository
pub type CaseId = String;

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Maximum preview length stored alongside each indexed vector
const PREVIEW_MAX_LEN: usize = 500;

/// A case record as extracted from the upstream repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Stable upstream identifier
    pub id: CaseId,
    /// Human-facing case number
    pub case_number: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// Upstream last-modified timestamp, drives window extraction
    pub last_modified: DateTime<Utc>,
}

impl CaseRecord {
    /// Join the text fields into the string that gets embedded
    pub fn combined_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        for field in [&self.subject, &self.description, &self.resolution] {
            let trimmed = field.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
        parts.join(" ")
    }
}

/// The subset of a case stored alongside its vector in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseMeta {
    pub case_id: CaseId,
    pub case_number: String,
    pub subject: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// Truncated combined text for result previews
    pub preview: String,
}

impl CaseMeta {
    /// Build index metadata from a full record
    pub fn from_record(record: &CaseRecord) -> Self {
        Self {
            case_id: record.id.clone(),
            case_number: record.case_number.clone(),
            subject: record.subject.clone(),
            status: record.status.clone(),
            created_at: record.created_at,
            preview: truncate_str(&record.combined_text(), PREVIEW_MAX_LEN),
        }
    }
}

/// A single similarity search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub similarity: f32,
    pub case: CaseMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CaseRecord {
        CaseRecord {
            id: "500A1".to_string(),
            case_number: "00012345".to_string(),
            subject: "Login fails".to_string(),
            description: "User cannot log in after password reset".to_string(),
            resolution: "Cleared stale session tokens".to_string(),
            status: "Closed".to_string(),
            created_at: Utc::now(),
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_combined_text_joins_nonempty_fields() {
        let mut r = record();
        r.resolution = "   ".to_string();
        let text = r.combined_text();
        assert_eq!(text, "Login fails User cannot log in after password reset");
    }

    #[test]
    fn test_case_meta_preview_is_truncated() {
        let mut r = record();
        r.description = "x".repeat(2000);
        let meta = CaseMeta::from_record(&r);
        assert!(meta.preview.len() <= 500);
        assert!(meta.preview.ends_with("..."));
        assert_eq!(meta.case_id, "500A1");
    }
}
