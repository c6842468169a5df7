//! Memcached Cache - Distributed Cache Backend
//!
//! Memcached-based distributed cache for warm data storage with simple key-value operations.
//!
//! **Note**: the `memcache` client is blocking, so every round-trip is moved
//! onto tokio's blocking pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheBackend;

/// Memcached treats expirations above 30 days as absolute unix timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Configuration for [`MemcachedCache`]
#[derive(Debug, Clone)]
pub struct MemcachedCacheConfig {
    /// Connection string, e.g. `memcache://127.0.0.1:11211`
    pub url: String,
    /// Instance label; the backend is named `MEMCACHED_<instance>`
    pub instance: String,
    /// TTL applied by `set`
    pub default_ttl: Duration,
    /// When disabled, writes are no-ops and reads miss
    pub enabled: bool,
}

impl Default for MemcachedCacheConfig {
    fn default() -> Self {
        Self {
            url: "memcache://127.0.0.1:11211".to_string(),
            instance: "default".to_string(),
            default_ttl: Duration::from_secs(60),
            enabled: true,
        }
    }
}

impl MemcachedCacheConfig {
    /// Defaults with `url` taken from `MEMCACHED_URL` when set
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("MEMCACHED_URL") {
            config.url = url;
        }
        config
    }
}

/// Memcached distributed cache
///
/// Unlike Redis, Memcached does not support TTL introspection or key scans.
pub struct MemcachedCache {
    name: String,
    config: MemcachedCacheConfig,
    client: Arc<memcache::Client>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl MemcachedCache {
    /// Create new Memcached cache configured from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the Memcached client cannot be created.
    pub async fn new() -> CacheResult<Self> {
        Self::with_config(MemcachedCacheConfig::from_env()).await
    }

    /// Create new Memcached cache with explicit configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot connect or the version probe fails.
    pub async fn with_config(config: MemcachedCacheConfig) -> CacheResult<Self> {
        let name = format!("MEMCACHED_{}", config.instance);
        info!(url = %config.url, name = %name, "Initializing Memcached Cache");

        let url = config.url.clone();
        let probe_name = name.clone();
        let client = tokio::task::spawn_blocking(move || -> CacheResult<memcache::Client> {
            let client = memcache::connect(url.as_str()).map_err(|e| CacheError::backend(&probe_name, e))?;
            let versions = client.version().map_err(|e| CacheError::backend(&probe_name, e))?;
            info!(server_count = versions.len(), "Memcached Cache connected successfully");
            Ok(client)
        })
        .await
        .map_err(|e| CacheError::backend(&name, e))??;

        Ok(Self {
            name,
            config,
            client: Arc::new(client),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Run a blocking client call on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|e| CacheError::backend(&self.name, e))?
            .map_err(|e| CacheError::backend(&self.name, e))
    }
}

#[async_trait]
impl CacheBackend for MemcachedCache {
    async fn get(&self, _group: &str, key: &str) -> CacheResult<Vec<u8>> {
        if !self.config.enabled {
            return Err(CacheError::Miss);
        }
        let owned_key = key.to_string();
        match self
            .blocking(move |client| client.get::<Vec<u8>>(&owned_key))
            .await?
        {
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
        // 0 means "never expire" to memcached; round sub-second TTLs up instead.
        let secs = ttl.as_secs().clamp(1, MAX_RELATIVE_EXPIRATION);
        let expiration = u32::try_from(secs).unwrap_or(u32::MAX);
        let owned_key = key.to_string();
        let payload = value.to_vec();

        self.blocking(move |client| client.set(&owned_key, payload.as_slice(), expiration))
            .await?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = %secs, "[Memcached] Cached key with TTL");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let owned_key = key.to_string();
        let existed = self.blocking(move |client| client.delete(&owned_key)).await?;
        if !existed {
            debug!(key = %key, "memcached key not found for deletion");
        }
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.blocking(|client| client.version().map(|_| ())).await
    }

    async fn close(&self) -> CacheResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                name = %self.name,
                hits = self.hits.load(Ordering::Relaxed),
                misses = self.misses.load(Ordering::Relaxed),
                sets = self.sets.load(Ordering::Relaxed),
                "[Memcached] Closed"
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
