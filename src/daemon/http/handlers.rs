//! HTTP API handlers
//!
//! The control surface over the core: jobs, sync status, manual trigger,
//! health, performance, backups, and search. Handlers translate
//! `SyncError` kinds into HTTP status codes; conflicts surface as 409.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{debug, error};

use crate::daemon::backup::BackupManager;
use crate::daemon::health::HealthMonitor;
use crate::daemon::index_manager::IndexManager;
use crate::daemon::perf::PerformanceRecorder;
use crate::daemon::scheduler::Scheduler;
use crate::daemon::sync::SyncEngine;
use crate::error::SyncError;

use super::types::*;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<SyncEngine>,
    pub index: Arc<IndexManager>,
    pub health: Arc<HealthMonitor>,
    pub perf: Arc<PerformanceRecorder>,
    pub backups: Arc<BackupManager>,
    pub started_at: Instant,
}

fn sync_error_response(e: &SyncError) -> Response {
    match e {
        SyncError::Conflict => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::conflict(&e.to_string())),
        )
            .into_response(),
        SyncError::Config(msg) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(msg)),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::internal_error(&e.to_string())),
        )
            .into_response(),
    }
}

/// Liveness check, no auth required
pub async fn liveness() -> impl IntoResponse {
    Json(LivenessResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Full health report
pub async fn health_report(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Daemon status summary
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let sync_state = state.engine.state();
    let active_jobs = state
        .scheduler
        .list_jobs()
        .iter()
        .filter(|j| j.status == crate::daemon::scheduler::JobStatus::Running)
        .count();

    Json(StatusResponse {
        running: true,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        total_vectors: state.index.count(),
        last_successful_sync: sync_state.last_successful_sync,
        active_jobs,
    })
}

/// Similarity search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    if request.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("query must not be empty")),
        )
            .into_response();
    }

    let top_k = request.top_k.unwrap_or(10);
    let start = Instant::now();
    let result = state
        .index
        .search(&request.query, top_k, request.threshold)
        .await;
    let query_time_ms = start.elapsed().as_millis() as u64;
    state
        .perf
        .record("http.search", start.elapsed(), result.is_ok());

    match result {
        Ok(results) => {
            debug!("Search returned {} results in {}ms", results.len(), query_time_ms);
            Json(SearchResponse {
                results,
                query_time_ms,
            })
            .into_response()
        }
        Err(e) => {
            error!("Search failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_error(&e.to_string())),
            )
                .into_response()
        }
    }
}

/// List all jobs
pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.list_jobs())
}

/// Get one job
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.scheduler.get_job(&job_id) {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("job")),
        )
            .into_response(),
    }
}

/// Update a job's schedule and enabled flag
pub async fn update_job_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(request): Json<ScheduleUpdateRequest>,
) -> Response {
    if state.scheduler.get_job(&job_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("job")),
        )
            .into_response();
    }

    match state
        .scheduler
        .update_schedule(&job_id, request.enabled, request.schedule)
    {
        Ok(job) => Json(job).into_response(),
        Err(e) => sync_error_response(&e),
    }
}

/// Manually trigger a job. Returns 409 while the job is running.
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    if state.scheduler.get_job(&job_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("job")),
        )
            .into_response();
    }

    match state.scheduler.trigger(&job_id) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(TriggerResponse {
                job_id,
                message: "Sync started".to_string(),
            }),
        )
            .into_response(),
        Err(e) => sync_error_response(&e),
    }
}

/// Current sync state
pub async fn sync_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.state())
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    10
}

/// Recent sync history, newest first
pub async fn sync_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    Json(state.engine.history(params.limit.min(100)))
}

/// List backups, newest first
pub async fn list_backups(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.backups.list())
}

/// Create an on-demand backup
pub async fn create_backup(
    State(state): State<AppState>,
    Json(request): Json<CreateBackupRequest>,
) -> Response {
    let description = request
        .description
        .unwrap_or_else(|| "Manual backup".to_string());

    match state.backups.create(
        state.index.index_path(),
        state.index.metadata_path(),
        &description,
    ) {
        Ok(backup_id) => Json(CreateBackupResponse { backup_id }).into_response(),
        Err(e) => {
            error!("Backup creation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_error(&e.to_string())),
            )
                .into_response()
        }
    }
}

/// Restore a backup. Rejected with 409 while a sync run is in flight.
pub async fn restore_backup(
    State(state): State<AppState>,
    Path(backup_id): Path<String>,
) -> Response {
    if state.backups.get(&backup_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("backup")),
        )
            .into_response();
    }

    match state.engine.restore_backup(&backup_id).await {
        Ok(()) => Json(OkResponse::new(format!("Backup {} restored", backup_id))).into_response(),
        Err(e) => sync_error_response(&e),
    }
}

/// Delete a backup
pub async fn delete_backup(
    State(state): State<AppState>,
    Path(backup_id): Path<String>,
) -> Response {
    if state.backups.get(&backup_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("backup")),
        )
            .into_response();
    }

    match state.backups.delete(&backup_id) {
        Ok(()) => Json(OkResponse::new(format!("Backup {} deleted", backup_id))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::internal_error(&e.to_string())),
        )
            .into_response(),
    }
}

/// Per-operation performance statistics
pub async fn performance_report(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.perf.report())
}

/// Rule-based optimization hints
pub async fn performance_recommendations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.perf.recommendations())
}

/// Persist a snapshot of the performance aggregates
pub async fn save_performance(State(state): State<AppState>) -> Response {
    match state.perf.save() {
        Ok(()) => Json(OkResponse::new("Performance metrics saved")).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::internal_error(&e.to_string())),
        )
            .into_response(),
    }
}
