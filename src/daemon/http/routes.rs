//! HTTP API route definitions

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use super::auth::{auth_middleware, AuthState};
use super::handlers::{self, AppState};

/// Create the API router with all routes
pub fn create_router(app_state: AppState, auth_state: AuthState) -> Router {
    let api_v1 = Router::new()
        // Liveness check (no auth required)
        .route("/health", get(handlers::liveness))
        // Protected routes
        .route("/health/report", get(handlers::health_report))
        .route("/status", get(handlers::status))
        .route("/search", post(handlers::search))
        // Jobs
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/{job_id}", get(handlers::get_job))
        .route("/jobs/{job_id}/schedule", put(handlers::update_job_schedule))
        .route("/jobs/{job_id}/trigger", post(handlers::trigger_job))
        // Sync state
        .route("/sync/status", get(handlers::sync_status))
        .route("/sync/history", get(handlers::sync_history))
        // Backups
        .route(
            "/backups",
            get(handlers::list_backups).post(handlers::create_backup),
        )
        .route("/backups/{backup_id}/restore", post(handlers::restore_backup))
        .route("/backups/{backup_id}", delete(handlers::delete_backup))
        // Performance
        .route("/performance", get(handlers::performance_report))
        .route(
            "/performance/recommendations",
            get(handlers::performance_recommendations),
        )
        .route("/performance/save", post(handlers::save_performance))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ))
        .with_state(app_state);

    Router::new().nest("/api/v1", api_v1)
}
