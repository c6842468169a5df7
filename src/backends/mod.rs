//! Cache Backend Implementations
//!
//! # Available Backends
//!
//! ## In-Memory
//! - **Moka** - Concurrent cache with automatic eviction; the process-wide default (feature: `moka`)
//! - **`DashMap`** - Simple concurrent HashMap-based cache
//!
//! ## Distributed
//! - **Redis** - Shared store that carries group update records across processes (feature: `redis`)
//! - **Memcached** - Lightweight distributed cache (feature: `memcached`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ctx_cache::backends::{MokaCache, RedisCache};
//! use ctx_cache::{CacheBackend, TieredCache, TieredCacheConfig};
//!
//! # async fn example() -> ctx_cache::CacheResult<()> {
//! let moka: Arc<dyn CacheBackend> = Arc::new(MokaCache::default());
//! let redis: Arc<dyn CacheBackend> = Arc::new(RedisCache::new().await?);
//! let tiered = TieredCache::new(TieredCacheConfig::default(), vec![moka, redis]);
//! # Ok(())
//! # }
//! ```

pub mod dashmap_cache;

#[cfg(feature = "moka")]
pub mod moka_cache;

#[cfg(feature = "redis")]
pub mod redis_cache;

#[cfg(feature = "memcached")]
pub mod memcached_cache;

pub use dashmap_cache::DashMapCache;

#[cfg(feature = "moka")]
pub use moka_cache::{MokaCache, MokaCacheConfig};

#[cfg(feature = "redis")]
pub use redis_cache::{RedisCache, RedisCacheConfig};

#[cfg(feature = "memcached")]
pub use memcached_cache::{MemcachedCache, MemcachedCacheConfig};
