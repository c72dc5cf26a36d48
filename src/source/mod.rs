//! Upstream case repository access
//!
//! The sync engine consumes the upstream through the narrow `CaseSource`
//! trait: paginated extraction over a modification-time window plus a cheap
//! reachability probe. The HTTP implementation lives in `http.rs`; tests
//! provide in-memory fixtures.

mod http;

pub use http::HttpCaseSource;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::SyncError;
use crate::types::CaseRecord;

/// One page of extracted records
#[derive(Debug, Clone)]
pub struct CasePage {
    pub records: Vec<CaseRecord>,
    /// Opaque cursor for the next page, None when exhausted
    pub next_cursor: Option<String>,
}

/// Paginated access to the upstream case repository
#[async_trait]
pub trait CaseSource: Send + Sync {
    /// Fetch one page of records with `last_modified` in `[from, to]`
    /// (both ends inclusive). Pass `None` as the cursor for the first page.
    async fn fetch_page(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<CasePage, SyncError>;

    /// Cheap reachability check, used by status and health surfaces
    async fn probe(&self) -> Result<(), SyncError>;
}

/// A cached value with an expiry, checked before any external call.
///
/// Status and health polls run frequently; caching the last probe result
/// for a short TTL keeps them from hammering the upstream system.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value if it has not expired
    pub fn get(&self) -> Option<T> {
        let slot = self.slot.lock();
        match slot.as_ref() {
            Some((value, fetched_at)) if fetched_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Store a freshly fetched value
    pub fn put(&self, value: T) {
        *self.slot.lock() = Some((value, Instant::now()));
    }

    /// Drop any cached value
    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_cache_returns_fresh_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());

        cache.put(true);
        assert_eq!(cache.get(), Some(true));
    }

    #[test]
    fn test_ttl_cache_expires() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.put(42u32);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_ttl_cache_invalidate() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.put("ok");
        cache.invalidate();
        assert!(cache.get().is_none());
    }
}
