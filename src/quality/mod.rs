//! Text quality validation and deduplication
//!
//! Filters extracted case records before they reach the embedding stage.
//! Every rejection is counted by reason so sync runs can report exactly
//! what was dropped and why.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::{CaseId, CaseRecord};

/// Outcome of validating a single record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Reject(RejectReason),
}

/// Why a record was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingId,
    MissingCaseNumber,
    TooFewWords,
    HighRepetition,
    HighSpecialChars,
    MostlyNumeric,
    DuplicateId,
    DuplicateContent,
    NearDuplicate,
}

/// Per-reason rejection counters for one filtering pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub missing_fields: usize,
    pub too_few_words: usize,
    pub high_repetition: usize,
    pub high_special_chars: usize,
    pub mostly_numeric: usize,
    pub duplicate_id: usize,
    pub duplicate_content: usize,
    pub near_duplicate: usize,
}

impl FilterStats {
    /// Total number of records dropped
    pub fn rejected(&self) -> usize {
        self.missing_fields
            + self.too_few_words
            + self.high_repetition
            + self.high_special_chars
            + self.mostly_numeric
            + self.duplicate_id
            + self.duplicate_content
            + self.near_duplicate
    }

    fn count(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::MissingId | RejectReason::MissingCaseNumber => self.missing_fields += 1,
            RejectReason::TooFewWords => self.too_few_words += 1,
            RejectReason::HighRepetition => self.high_repetition += 1,
            RejectReason::HighSpecialChars => self.high_special_chars += 1,
            RejectReason::MostlyNumeric => self.mostly_numeric += 1,
            RejectReason::DuplicateId => self.duplicate_id += 1,
            RejectReason::DuplicateContent => self.duplicate_content += 1,
            RejectReason::NearDuplicate => self.near_duplicate += 1,
        }
    }
}

/// Quality filter thresholds
#[derive(Debug, Clone)]
pub struct TextQuality {
    /// Minimum words in the combined text
    pub min_words: usize,
    /// Maximum fraction of repeated words/characters
    pub max_repetition: f64,
    /// Maximum fraction of non-alphanumeric, non-whitespace characters
    pub max_special_char_ratio: f64,
    /// Maximum fraction of numeric characters
    pub max_numeric_ratio: f64,
}

impl Default for TextQuality {
    fn default() -> Self {
        Self {
            min_words: 5,
            max_repetition: 0.7,
            max_special_char_ratio: 0.3,
            max_numeric_ratio: 0.5,
        }
    }
}

impl TextQuality {
    /// Validate a single record against required fields and quality filters
    pub fn validate(&self, record: &CaseRecord) -> Verdict {
        if record.id.trim().is_empty() {
            return Verdict::Reject(RejectReason::MissingId);
        }
        if record.case_number.trim().is_empty() {
            return Verdict::Reject(RejectReason::MissingCaseNumber);
        }

        let text = record.combined_text();
        if text.split_whitespace().count() < self.min_words {
            return Verdict::Reject(RejectReason::TooFewWords);
        }
        if repetition_score(&text) > self.max_repetition {
            return Verdict::Reject(RejectReason::HighRepetition);
        }
        if special_char_ratio(&text) > self.max_special_char_ratio {
            return Verdict::Reject(RejectReason::HighSpecialChars);
        }
        if numeric_ratio(&text) > self.max_numeric_ratio {
            return Verdict::Reject(RejectReason::MostlyNumeric);
        }

        Verdict::Keep
    }

    /// Validate and deduplicate a batch of records.
    ///
    /// `indexed_ids` is the set of identifiers already present in the index;
    /// records matching it are dropped (additive-only sync, no update in
    /// place). Within the batch, exact text duplicates and normalized
    /// content-hash near-duplicates are dropped keeping the most recently
    /// modified record, and repeated ids keep the first occurrence.
    pub fn filter(
        &self,
        records: Vec<CaseRecord>,
        indexed_ids: &HashSet<CaseId>,
    ) -> (Vec<CaseRecord>, FilterStats) {
        let mut stats = FilterStats::default();

        // Validate first, then dedupe the survivors
        let mut valid: Vec<CaseRecord> = Vec::with_capacity(records.len());
        for record in records {
            match self.validate(&record) {
                Verdict::Keep => valid.push(record),
                Verdict::Reject(reason) => {
                    debug!("Rejecting case {}: {:?}", record.id, reason);
                    stats.count(reason);
                }
            }
        }

        // Most recent first so hash dedupe keeps the newest version
        valid.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        let mut seen_ids: HashSet<CaseId> = HashSet::new();
        let mut seen_text: HashSet<String> = HashSet::new();
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut kept: Vec<CaseRecord> = Vec::with_capacity(valid.len());

        for record in valid {
            if indexed_ids.contains(&record.id) {
                stats.count(RejectReason::DuplicateId);
                continue;
            }
            if !seen_ids.insert(record.id.clone()) {
                stats.count(RejectReason::DuplicateId);
                continue;
            }
            let text = record.combined_text();
            if !seen_text.insert(text.clone()) {
                stats.count(RejectReason::DuplicateContent);
                continue;
            }
            let hash = content_hash(&text);
            if !seen_hashes.insert(hash) {
                stats.count(RejectReason::NearDuplicate);
                continue;
            }
            kept.push(record);
        }

        stats.kept = kept.len();
        (kept, stats)
    }
}

/// Fraction of the text made up of repeated words or a single dominant
/// character. High values indicate boilerplate or corrupted content.
fn repetition_score(text: &str) -> f64 {
    if text.len() < 10 {
        return 0.0;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let unique: HashSet<&str> = words.iter().copied().collect();
    let word_repetition = 1.0 - (unique.len() as f64 / words.len() as f64);

    let mut char_counts: std::collections::HashMap<char, usize> = std::collections::HashMap::new();
    let mut alpha_total = 0usize;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        let lower = c.to_ascii_lowercase();
        *char_counts.entry(lower).or_insert(0) += 1;
        alpha_total += 1;
    }
    let char_repetition = if alpha_total > 0 {
        char_counts.values().copied().max().unwrap_or(0) as f64 / alpha_total as f64
    } else {
        0.0
    };

    word_repetition.max(char_repetition)
}

/// Fraction of non-alphanumeric, non-whitespace characters
fn special_char_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let total = text.chars().count();
    let special = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    special as f64 / total as f64
}

/// Fraction of numeric characters
fn numeric_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let total = text.chars().count();
    let numeric = text.chars().filter(|c| c.is_ascii_digit()).count();
    numeric as f64 / total as f64
}

/// Normalized content hash for near-duplicate detection.
///
/// Lowercases, strips punctuation, collapses whitespace, and hashes the
/// first 1000 characters so cases with identical beginnings collide.
fn content_hash(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len().min(1024));
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            normalized.extend(c.to_lowercase());
            last_was_space = false;
        } else if c.is_whitespace() && !last_was_space {
            normalized.push(' ');
            last_was_space = true;
        }
        if normalized.len() >= 1000 {
            break;
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(normalized.trim_end().as_bytes());
    hex::encode(hasher.finalize())
}
