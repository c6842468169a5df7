//! Context Cache
//!
//! A typed, group-aware caching facade over pluggable backends featuring:
//! - **Typed Facade**: `get`/`set`/`get_set` for any serde type, keyed by type, group and key
//! - **Primitive Fast Path**: integers, floats, booleans and strings stored as plain text
//! - **Tiered Cache**: ordered backends behind one backend, with read backfill and fan-out writes
//! - **Group Monitor**: membership tracking, group invalidation and cross-process staleness detection
//! - **Request-Scoped Context**: bind a backend and monitor to a task, or use the process default
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use ctx_cache::facade;
//!
//! #[tokio::main]
//! async fn main() -> ctx_cache::CacheResult<()> {
//!     // No context bound: the process-wide in-memory default is used
//!     facade::set("grp", "k", &123_i64).await?;
//!     assert_eq!(facade::get::<i64>("grp", "k").await?, 123);
//!
//!     // Cache-aside: the loader only runs on a miss
//!     let profile: String = facade::get_set(Duration::from_secs(60), "users", "1", false, || async {
//!         Ok("alice".to_string())
//!     })
//!     .await?;
//!     tracing::info!(%profile, "loaded profile");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! facade::get_set ─→ CacheContext ─→ backend (Moka | Redis | Memcached | TieredCache[..])
//!                         │                 ↑
//!                         └─→ CacheMonitor ─┘  group update records under RESERVED_GROUP
//! ```

pub mod backends;
pub mod builder;
pub mod codec;
pub mod codecs;
pub mod context;
pub mod error;
pub mod facade;
pub mod monitor;
pub mod tiered_cache;
pub mod traits;

pub use backends::DashMapCache;

#[cfg(feature = "moka")]
pub use backends::{MokaCache, MokaCacheConfig};

#[cfg(feature = "redis")]
pub use backends::{RedisCache, RedisCacheConfig};

#[cfg(feature = "memcached")]
pub use backends::{MemcachedCache, MemcachedCacheConfig};

pub use builder::{CacheContextBuilder, MonitorKind};
pub use codec::Cacheable;
pub use codecs::JsonCodec;
pub use context::{CacheContext, FacadeOptions};
pub use error::{CacheError, CacheResult, CombinedError};
pub use facade::cache_key;
pub use monitor::{
    CacheMonitor, GroupMonitor, MembershipMode, MonitorConfig, MonitorStats, NoopMonitor, RESERVED_GROUP,
    is_reserved_group,
};
pub use tiered_cache::{BackfillMode, TieredCache, TieredCacheConfig, TieredCacheStats};
pub use traits::{CacheBackend, CacheCodec, MemberBackends, SourceLoader};

// Re-export async_trait for custom backend implementations
pub use async_trait::async_trait;
