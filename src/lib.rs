//! casedex: incremental vector-index synchronization for case search
//!
//! Keeps a persisted vector-similarity search index in step with a
//! continuously growing upstream case repository:
//! - Scheduled incremental sync with windowed extraction and overlap
//! - Text quality filtering and dedupe before embedding
//! - Backup-protected atomic merges (the index on disk is always either
//!   the pre-run or the fully-merged post-run state)
//! - Health and performance instrumentation over the whole pipeline
//! - REST control surface for jobs, sync, backups, and search

pub mod config;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod index;
pub mod quality;
pub mod source;
pub mod types;
pub mod util;

pub use config::Config;
pub use error::SyncError;
pub use types::*;
