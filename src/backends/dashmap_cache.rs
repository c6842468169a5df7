//! `DashMap` Cache - Simple Concurrent `HashMap` Backend
//!
//! A lightweight in-memory cache using `DashMap` for concurrent access.
//! Handy as a test double and as a reference for writing custom backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheBackend;

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            // A zero TTL, or one too large to represent, means "no expiry".
            expires_at: if ttl.is_zero() { None } else { Instant::now().checked_add(ttl) },
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() > expires_at)
    }
}

/// Simple concurrent cache using `DashMap`
///
/// **Features**:
/// - Lock-free concurrent reads/writes
/// - Manual TTL tracking
/// - No automatic eviction (call [`cleanup_expired`](Self::cleanup_expired))
///
/// **Example**:
/// ```rust
/// use ctx_cache::backends::DashMapCache;
/// use ctx_cache::CacheBackend;
///
/// # async fn example() -> ctx_cache::CacheResult<()> {
/// let cache = DashMapCache::new("local");
/// cache.set("users", "user:1", b"alice").await?;
/// assert_eq!(cache.get("users", "user:1").await?, b"alice");
/// # Ok(())
/// # }
/// ```
pub struct DashMapCache {
    name: String,
    default_ttl: Duration,
    map: Arc<DashMap<String, CacheEntry>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl DashMapCache {
    /// Create new `DashMap` cache with a five minute default TTL
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_default_ttl(name, Duration::from_secs(300))
    }

    pub fn with_default_ttl(name: impl Into<String>, default_ttl: Duration) -> Self {
        let name = name.into();
        info!(name = %name, "Initializing DashMap Cache (concurrent HashMap)");

        Self {
            name,
            default_ttl,
            map: Arc::new(DashMap::new()),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Cleanup expired entries (should be called periodically)
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[DashMap] Cleaned up expired entries");
        }
        removed
    }

    /// Get current cache size
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `(hits, misses, sets)` observed so far
    #[must_use]
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl CacheBackend for DashMapCache {
    async fn get(&self, _group: &str, key: &str) -> CacheResult<Vec<u8>> {
        if let Some(entry) = self.map.get(key) {
            if entry.is_expired() {
                drop(entry); // release the shard read lock before removing
                self.map.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Miss)
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.value.clone())
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Err(CacheError::Miss)
        }
    }

    async fn set_with_ttl(&self, ttl: Duration, _group: &str, key: &str, value: &[u8]) -> CacheResult<()> {
        self.map.insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[DashMap] Cached key with TTL");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.map.clear();
            info!(name = %self.name, "[DashMap] Closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
