//! HTTP API request and response types

use serde::{Deserialize, Serialize};

use crate::daemon::scheduler::Schedule;
use crate::types::SearchResult;

/// Generic error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: String, message: String) -> Self {
        Self { code, message }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            "UNAUTHORIZED".to_string(),
            "Missing or invalid API key".to_string(),
        )
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("NOT_FOUND".to_string(), format!("{} not found", what))
    }

    pub fn conflict(message: &str) -> Self {
        Self::new("CONFLICT".to_string(), message.to_string())
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("INTERNAL_ERROR".to_string(), message.to_string())
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("INVALID_REQUEST".to_string(), message.to_string())
    }
}

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub healthy: bool,
    pub version: String,
}

/// Daemon status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_seconds: u64,
    pub total_vectors: usize,
    pub last_successful_sync: Option<chrono::DateTime<chrono::Utc>>,
    pub active_jobs: usize,
}

/// Search request body
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

/// Search response body
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query_time_ms: u64,
}

/// Job schedule update request
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleUpdateRequest {
    pub enabled: bool,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

/// Trigger acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub job_id: String,
    pub message: String,
}

/// Backup creation request
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateBackupRequest {
    #[serde(default)]
    pub description: Option<String>,
}

/// Backup creation acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBackupResponse {
    pub backup_id: String,
}

/// Generic success acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub success: bool,
    pub message: String,
}

impl OkResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
