//! Moka Cache - In-Memory Cache Backend
//!
//! High-performance in-memory cache using Moka for hot data storage. This is
//! the process-wide default backend when no other one is bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheBackend;

/// Cache entry with TTL information
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<[u8]>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: &[u8], ttl: Duration) -> Self {
        Self {
            value: Arc::from(value),
            // Past the representable range the Moka-wide TTL is the only bound.
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| Instant::now() > expires_at)
    }
}

/// Configuration for `MokaCache`
#[derive(Debug, Clone)]
pub struct MokaCacheConfig {
    /// Name reported by [`CacheBackend::name`]
    pub name: String,
    /// Max capacity of the cache
    pub max_capacity: u64,
    /// TTL applied by `set`; also the upper bound Moka enforces on every entry
    pub default_ttl: Duration,
    /// Time to idle for cache entries
    pub time_to_idle: Duration,
}

impl Default for MokaCacheConfig {
    fn default() -> Self {
        Self {
            name: "moka".to_string(),
            max_capacity: 10_000,
            default_ttl: Duration::from_secs(3600),
            time_to_idle: Duration::from_secs(600),
        }
    }
}

/// Moka in-memory cache with per-key TTL support
///
/// - Fast in-memory access (< 1ms latency)
/// - Automatic eviction via `TinyLFU`
/// - Per-key TTL support on top of Moka's global bounds
pub struct MokaCache {
    name: String,
    default_ttl: Duration,
    cache: Cache<String, CacheEntry>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl MokaCache {
    /// Create new Moka cache
    #[must_use]
    pub fn new(config: MokaCacheConfig) -> Self {
        info!(name = %config.name, capacity = config.max_capacity, "Initializing Moka Cache");

        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.default_ttl)
            .time_to_idle(config.time_to_idle)
            .build();

        Self {
            name: config.name,
            default_ttl: config.default_ttl,
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Snapshot of hit/miss/set counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            size: self.cache.entry_count(),
        }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(MokaCacheConfig::default())
    }
}

#[async_trait]
impl CacheBackend for MokaCache {
    async fn get(&self, _group: &str, key: &str) -> CacheResult<Vec<u8>> {
        if let Some(entry) = self.cache.get(key).await {
            if entry.is_expired() {
                self.cache.remove(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Miss)
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.value.to_vec())
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Err(CacheError::Miss)
        }
    }

    async fn set_with_ttl(&self, ttl: Duration, _group: &str, key: &str, value: &[u8]) -> CacheResult<()> {
        self.cache
            .insert(key.to_string(), CacheEntry::new(value, ttl))
            .await;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[Moka] Cached key with TTL");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cache.invalidate_all();
            info!(name = %self.name, "[Moka] Closed");
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

/// Cache statistics
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub size: u64,
}
