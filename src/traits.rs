//! Cache Backend Traits
//!
//! This module defines the seams of the crate:
//!
//! - `CacheCodec`: pluggable serializer for structured (envelope) payloads
//! - `CacheBackend`: capability contract every cache store implements
//! - `SourceLoader`: source of truth consulted by a tiered cache when every tier misses
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use ctx_cache::{CacheBackend, CacheResult, async_trait};
//! use std::time::Duration;
//!
//! struct MyStore { /* ... */ }
//!
//! #[async_trait]
//! impl CacheBackend for MyStore {
//!     async fn get(&self, group: &str, key: &str) -> CacheResult<Vec<u8>> { todo!() }
//!     async fn set_with_ttl(&self, ttl: Duration, group: &str, key: &str, value: &[u8]) -> CacheResult<()> { todo!() }
//!     async fn delete(&self, key: &str) -> CacheResult<()> { todo!() }
//!     async fn ping(&self) -> CacheResult<()> { Ok(()) }
//!     async fn close(&self) -> CacheResult<()> { Ok(()) }
//!     fn name(&self) -> &str { "my-store" }
//!     fn default_ttl(&self) -> Duration { Duration::from_secs(60) }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheResult;

/// Trait for structured payload serialization
///
/// Primitive scalars never reach a codec; they are written in their textual
/// form by [`Cacheable`](crate::codec::Cacheable). Everything else is wrapped
/// in an envelope and handed to a codec.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug`.
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encode`](crate::CacheError::Encode) when the value cannot be represented.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`](crate::CacheError::Decode) when the payload has the wrong shape.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T>;

    /// Codec name, used in logs
    fn name(&self) -> &'static str;
}

/// Named set of backends, as returned by [`CacheBackend::member_backends`]
pub type MemberBackends = BTreeMap<String, Arc<dyn CacheBackend>>;

/// Capability contract for every cache store
///
/// Values are opaque bytes addressed by a composite key; the `group` argument
/// is informational for stores that partition by group and may be ignored.
///
/// # Required Operations
///
/// - `get`: fails with [`CacheError::Miss`](crate::CacheError::Miss) when absent or expired
/// - `set_with_ttl`: last write wins, safe to call concurrently for different keys
/// - `delete`: deleting an absent key succeeds
/// - `ping` / `close`: liveness check and resource release (`close` is idempotent)
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the crate never locks a backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read the payload stored under `key`
    async fn get(&self, group: &str, key: &str) -> CacheResult<Vec<u8>>;

    /// Store `value` under `key` with the backend's default TTL
    async fn set(&self, group: &str, key: &str, value: &[u8]) -> CacheResult<()> {
        self.set_with_ttl(self.default_ttl(), group, key, value).await
    }

    /// Store `value` under `key`, expiring after `ttl`
    async fn set_with_ttl(&self, ttl: Duration, group: &str, key: &str, value: &[u8]) -> CacheResult<()>;

    /// Remove `key`
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Liveness check
    async fn ping(&self) -> CacheResult<()>;

    /// Release resources held by the backend
    async fn close(&self) -> CacheResult<()>;

    /// Stable identifier used in diagnostics
    fn name(&self) -> &str;

    /// TTL applied by [`set`](Self::set)
    fn default_ttl(&self) -> Duration;

    /// Direct children of an aggregate backend; leaf stores return nothing
    fn member_backends(&self) -> MemberBackends {
        MemberBackends::new()
    }
}

/// Source of truth for a tiered cache, consulted after every tier missed
#[async_trait]
pub trait SourceLoader: Send + Sync {
    async fn load(&self, group: &str, key: &str) -> CacheResult<Vec<u8>>;
}

#[async_trait]
impl<F, Fut> SourceLoader for F
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = CacheResult<Vec<u8>>> + Send,
{
    async fn load(&self, group: &str, key: &str) -> CacheResult<Vec<u8>> {
        self(group.to_string(), key.to_string()).await
    }
}
