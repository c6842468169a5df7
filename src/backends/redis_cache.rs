//! Redis Cache - Distributed Cache Backend
//!
//! Redis-based distributed cache shared by every process that points at the
//! same server. Group update records written here are what lets monitors in
//! other processes notice a change.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheBackend;

/// Configuration for [`RedisCache`]
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Connection string, e.g. `redis://127.0.0.1:6379`
    pub url: String,
    /// Instance label; the backend is named `REDISCACHE_<instance>`
    pub instance: String,
    /// TTL applied by `set`
    pub default_ttl: Duration,
    /// Deadline for every round-trip
    pub op_timeout: Duration,
    /// When disabled, writes are no-ops and reads miss
    pub enabled: bool,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            instance: "default".to_string(),
            default_ttl: Duration::from_secs(60),
            op_timeout: Duration::from_secs(2),
            enabled: true,
        }
    }
}

impl RedisCacheConfig {
    /// Defaults overridden by `REDIS_URL`, `REDIS_INSTANCE` and `REDIS_ENABLED`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.url = url;
        }
        if let Ok(instance) = std::env::var("REDIS_INSTANCE") {
            config.instance = instance;
        }
        if let Ok(enabled) = std::env::var("REDIS_ENABLED") {
            config.enabled = !matches!(enabled.as_str(), "0" | "false" | "no");
        }
        config
    }
}

/// Redis distributed cache with `ConnectionManager` for automatic reconnection
pub struct RedisCache {
    name: String,
    config: RedisCacheConfig,
    /// Redis connection manager - handles reconnection automatically
    conn_manager: ConnectionManager,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl RedisCache {
    /// Create new Redis cache configured from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn new() -> CacheResult<Self> {
        Self::with_config(RedisCacheConfig::from_env()).await
    }

    /// Create new Redis cache with explicit configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn with_config(config: RedisCacheConfig) -> CacheResult<Self> {
        let name = format!("REDISCACHE_{}", config.instance);
        info!(redis_url = %config.url, name = %name, "Initializing Redis Cache with ConnectionManager");

        let client = Client::open(config.url.as_str()).map_err(|e| CacheError::backend(&name, e))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::backend(&name, e))?;

        let cache = Self {
            name,
            config,
            conn_manager,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        };
        cache.ping().await?;

        info!(name = %cache.name, "Redis Cache connected successfully (ConnectionManager enabled)");
        Ok(cache)
    }

    /// Run one round-trip under the configured deadline
    async fn bounded<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::backend(&self.name, e)),
            Err(_) => Err(CacheError::Timeout {
                backend: self.name.clone(),
                after: self.config.op_timeout,
            }),
        }
    }

    /// Scan keys matching a glob pattern with cursor-based `SCAN`
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis command fails.
    pub async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;

            cursor = next;
            keys.extend(batch);

            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, _group: &str, key: &str) -> CacheResult<Vec<u8>> {
        if !self.config.enabled {
            return Err(CacheError::Miss);
        }
        let mut conn = self.conn_manager.clone();

        match self.bounded(conn.get::<_, Option<Vec<u8>>>(key)).await? {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Miss)
            }
        }
    }

    async fn set_with_ttl(&self, ttl: Duration, _group: &str, key: &str, value: &[u8]) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();

        // SET EX rejects 0; round sub-second TTLs up.
        let secs = ttl.as_secs().max(1);
        let () = self.bounded(conn.set_ex(key, value, secs)).await?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = %secs, "[Redis] Cached key with TTL");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn_manager.clone();
        let removed: usize = self.bounded(conn.del(key)).await.inspect_err(|e| {
            warn!(key = %key, error = %e, "failed deleting redis cache key");
        })?;
        if removed == 0 {
            debug!(key = %key, "redis key not found for deletion");
        }
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn_manager.clone();
        let _: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        // ConnectionManager drops its connection with the last clone.
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                name = %self.name,
                hits = self.hits.load(Ordering::Relaxed),
                misses = self.misses.load(Ordering::Relaxed),
                sets = self.sets.load(Ordering::Relaxed),
                "[Redis] Closed"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }
}
