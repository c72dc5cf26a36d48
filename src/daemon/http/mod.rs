//! HTTP control surface
//!
//! REST API over the core: jobs, sync status/history, manual trigger,
//! health and performance reports, backups, and search.

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod types;

pub use handlers::AppState;
pub use server::HttpServer;
