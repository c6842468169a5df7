//! Typed Facade
//!
//! Typed `get`/`set`/`get_set` entry points. Each value lives under a
//! composite key built from its type tag, group and key, so the same
//! `(group, key)` can hold values of different types side by side.
//!
//! Calls go through the [`CacheContext`] bound to the current task (see
//! [`CacheContext::scope`]) or the process-wide default. Every write is
//! reported to the context's monitor unless the group is reserved, empty or
//! equal to the key.
//!
//! # Example
//!
//! ```rust
//! use ctx_cache::facade;
//! use std::time::Duration;
//!
//! # async fn example() -> ctx_cache::CacheResult<()> {
//! facade::set("grp", "k", &123_i64).await?;
//! assert_eq!(facade::get::<i64>("grp", "k").await?, 123);
//!
//! let answer: i64 = facade::get_set(Duration::from_secs(60), "grp", "answer", false, || async {
//!     Ok(42)
//! })
//! .await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codec::{Cacheable, decode, encode};
use crate::context::CacheContext;
use crate::error::{CacheError, CacheResult};
use crate::monitor::is_untracked_group;
use crate::traits::CacheBackend;

/// Composite key `"<type-tag>:<group>:<key>"`
///
/// `:` and `\` inside the tag or the group are escaped with a backslash, so
/// every separator before the key is unambiguous and `("a:b", "c")` never
/// collides with `("a", "b:c")`. The key goes in verbatim.
#[must_use]
pub fn cache_key<T: Cacheable>(group: &str, key: &str) -> String {
    format!("{}:{}:{key}", escape_segment(&T::type_tag()), escape_segment(group))
}

fn escape_segment(segment: &str) -> Cow<'_, str> {
    if !segment.contains([':', '\\']) {
        return Cow::Borrowed(segment);
    }
    let mut escaped = String::with_capacity(segment.len() + 4);
    for c in segment.chars() {
        if c == ':' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// Write `value` to an explicit backend with its default TTL, bypassing the
/// monitor
///
/// # Errors
///
/// Returns encode or backend errors.
pub async fn store<T: Cacheable>(backend: &dyn CacheBackend, group: &str, key: &str, value: &T) -> CacheResult<()> {
    let payload = encode(value)?;
    backend.set(group, &cache_key::<T>(group, key), &payload).await
}

/// [`store`] with an explicit TTL
///
/// # Errors
///
/// Returns encode or backend errors.
pub async fn store_with_ttl<T: Cacheable>(
    backend: &dyn CacheBackend,
    ttl: Duration,
    group: &str,
    key: &str,
    value: &T,
) -> CacheResult<()> {
    let payload = encode(value)?;
    backend
        .set_with_ttl(ttl, group, &cache_key::<T>(group, key), &payload)
        .await
}

/// Read a value from an explicit backend, ignoring staleness
///
/// # Errors
///
/// [`CacheError::Miss`] when absent, decode or backend errors otherwise.
pub async fn load<T: Cacheable>(backend: &dyn CacheBackend, group: &str, key: &str) -> CacheResult<T> {
    let payload = backend.get(group, &cache_key::<T>(group, key)).await?;
    decode(&payload)
}

/// Removes the in-flight entry once the coalesced load finishes
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

impl CacheContext {
    /// Store `value` with the backend's default TTL and register it with the monitor
    ///
    /// # Errors
    ///
    /// Returns encode, backend or monitor bookkeeping errors.
    pub async fn set<T: Cacheable>(&self, group: &str, key: &str, value: &T) -> CacheResult<()> {
        let composite = cache_key::<T>(group, key);
        let payload = encode(value)?;
        self.backend().set(group, &composite, &payload).await?;
        self.track(group, key, &composite).await
    }

    /// Store `value` expiring after `ttl` and register it with the monitor
    ///
    /// # Errors
    ///
    /// Returns encode, backend or monitor bookkeeping errors.
    pub async fn set_with_ttl<T: Cacheable>(&self, ttl: Duration, group: &str, key: &str, value: &T) -> CacheResult<()> {
        let composite = cache_key::<T>(group, key);
        let payload = encode(value)?;
        self.backend()
            .set_with_ttl(ttl, group, &composite, &payload)
            .await?;
        self.track(group, key, &composite).await
    }

    async fn track(&self, group: &str, key: &str, composite: &str) -> CacheResult<()> {
        // Bookkeeping entries are keyed by their own group name.
        if is_untracked_group(group) || group == key {
            return Ok(());
        }
        self.monitor().update_cache(group, composite).await
    }

    /// Read a value
    ///
    /// # Errors
    ///
    /// - [`CacheError::Miss`] when nothing is stored
    /// - [`CacheError::Updated`] when staleness tracking on read is enabled
    ///   and the group changed elsewhere
    /// - decode or backend errors
    pub async fn get<T: Cacheable>(&self, group: &str, key: &str) -> CacheResult<T> {
        let payload = self.backend().get(group, &cache_key::<T>(group, key)).await?;
        if self.options().track_staleness_on_read && self.monitor().has_group_key_been_updated(group).await {
            debug!(group = %group, key = %key, "cached value belongs to a stale group");
            return Err(CacheError::Updated);
        }
        decode(&payload)
    }

    /// Cache-aside read: return the cached value, or call `loader`, store its
    /// result for `ttl` and return it. `force_refresh` skips the cache read.
    ///
    /// # Errors
    ///
    /// Loader errors are returned unchanged as [`CacheError::Loader`] and
    /// nothing is stored. Store failures after a successful load are returned too.
    pub async fn get_set<T, F, Fut>(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        force_refresh: bool,
        loader: F,
    ) -> CacheResult<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.get_set_with(ttl, group, key, force_refresh, |_: &T| true, || async move {
            loader().await.map_err(CacheError::Loader)
        })
        .await
    }

    /// [`get_set`](Self::get_set) for loaders that may find nothing
    ///
    /// # Errors
    ///
    /// [`CacheError::LoaderEmpty`] when the loader returns `None`; otherwise
    /// as [`get_set`](Self::get_set).
    pub async fn get_set_opt<T, F, Fut>(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        force_refresh: bool,
        loader: F,
    ) -> CacheResult<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        self.get_set_with(ttl, group, key, force_refresh, |_: &T| true, || async move {
            loader()
                .await
                .map_err(CacheError::Loader)?
                .ok_or(CacheError::LoaderEmpty)
        })
        .await
    }

    /// [`get_set`](Self::get_set) that also refetches when a cached value
    /// fails `is_valid`
    ///
    /// # Errors
    ///
    /// As [`get_set`](Self::get_set).
    pub async fn get_set_checked<T, V, F, Fut>(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        force_refresh: bool,
        is_valid: V,
        loader: F,
    ) -> CacheResult<T>
    where
        T: Cacheable,
        V: Fn(&T) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.get_set_with(ttl, group, key, force_refresh, is_valid, || async move {
            loader().await.map_err(CacheError::Loader)
        })
        .await
    }

    async fn get_set_with<T, V, F, Fut>(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        force_refresh: bool,
        is_valid: V,
        loader: F,
    ) -> CacheResult<T>
    where
        T: Cacheable,
        V: Fn(&T) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        if force_refresh {
            return self.refresh(ttl, group, key, loader).await;
        }
        if let Some(value) = self.cached(group, key, &is_valid).await {
            return Ok(value);
        }
        if !self.options().coalesce_misses {
            return self.refresh(ttl, group, key, loader).await;
        }

        let composite = cache_key::<T>(group, key);
        let lock = Arc::clone(
            self.in_flight()
                .entry(composite.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _permit = lock.lock().await;
        let _cleanup = CleanupGuard {
            map: self.in_flight(),
            key: composite,
        };

        // Another caller may have filled the key while we waited.
        if let Some(value) = self.cached(group, key, &is_valid).await {
            return Ok(value);
        }
        self.refresh(ttl, group, key, loader).await
    }

    async fn cached<T, V>(&self, group: &str, key: &str, is_valid: &V) -> Option<T>
    where
        T: Cacheable,
        V: Fn(&T) -> bool,
    {
        match self.get::<T>(group, key).await {
            Ok(value) if is_valid(&value) => Some(value),
            Ok(_) => {
                debug!(group = %group, key = %key, "cached value failed validity check");
                None
            }
            Err(e) if e.should_refetch() => None,
            Err(e) => {
                warn!(group = %group, key = %key, error = %e, "cache read failed, falling back to loader");
                None
            }
        }
    }

    async fn refresh<T, F, Fut>(&self, ttl: Duration, group: &str, key: &str, loader: F) -> CacheResult<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let value = loader().await?;
        self.set_with_ttl(ttl, group, key, &value).await?;
        Ok(value)
    }

    /// Remove the value of type `T` under `(group, key)`
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn delete<T: Cacheable>(&self, group: &str, key: &str) -> CacheResult<()> {
        self.backend().delete(&cache_key::<T>(group, key)).await
    }

    /// Remove a raw composite key
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn delete_key(&self, key: &str) -> CacheResult<()> {
        self.backend().delete(key).await
    }
}

/// [`CacheContext::set`] on the current context
///
/// # Errors
///
/// See [`CacheContext::set`].
pub async fn set<T: Cacheable>(group: &str, key: &str, value: &T) -> CacheResult<()> {
    CacheContext::current().set(group, key, value).await
}

/// [`CacheContext::set_with_ttl`] on the current context
///
/// # Errors
///
/// See [`CacheContext::set_with_ttl`].
pub async fn set_with_ttl<T: Cacheable>(ttl: Duration, group: &str, key: &str, value: &T) -> CacheResult<()> {
    CacheContext::current()
        .set_with_ttl(ttl, group, key, value)
        .await
}

/// [`CacheContext::get`] on the current context
///
/// # Errors
///
/// See [`CacheContext::get`].
pub async fn get<T: Cacheable>(group: &str, key: &str) -> CacheResult<T> {
    CacheContext::current().get(group, key).await
}

/// [`CacheContext::get_set`] on the current context
///
/// # Errors
///
/// See [`CacheContext::get_set`].
pub async fn get_set<T, F, Fut>(ttl: Duration, group: &str, key: &str, force_refresh: bool, loader: F) -> CacheResult<T>
where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    CacheContext::current()
        .get_set(ttl, group, key, force_refresh, loader)
        .await
}

/// [`CacheContext::get_set_opt`] on the current context
///
/// # Errors
///
/// See [`CacheContext::get_set_opt`].
pub async fn get_set_opt<T, F, Fut>(ttl: Duration, group: &str, key: &str, force_refresh: bool, loader: F) -> CacheResult<T>
where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    CacheContext::current()
        .get_set_opt(ttl, group, key, force_refresh, loader)
        .await
}

/// [`CacheContext::get_set_checked`] on the current context
///
/// # Errors
///
/// See [`CacheContext::get_set_checked`].
pub async fn get_set_checked<T, V, F, Fut>(
    ttl: Duration,
    group: &str,
    key: &str,
    force_refresh: bool,
    is_valid: V,
    loader: F,
) -> CacheResult<T>
where
    T: Cacheable,
    V: Fn(&T) -> bool,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    CacheContext::current()
        .get_set_checked(ttl, group, key, force_refresh, is_valid, loader)
        .await
}

/// [`CacheContext::delete`] on the current context
///
/// # Errors
///
/// See [`CacheContext::delete`].
pub async fn delete<T: Cacheable>(group: &str, key: &str) -> CacheResult<()> {
    CacheContext::current().delete::<T>(group, key).await
}

/// [`CacheContext::delete_key`] on the current context
///
/// # Errors
///
/// See [`CacheContext::delete_key`].
pub async fn delete_key(key: &str) -> CacheResult<()> {
    CacheContext::current().delete_key(key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DashMapCache;

    #[test]
    fn test_cache_key_is_deterministic_per_type() {
        assert_eq!(cache_key::<i64>("g", "k"), cache_key::<i64>("g", "k"));
        assert_eq!(cache_key::<i64>("g", "k"), "i64:g:k");
        assert_ne!(cache_key::<i64>("g", "k"), cache_key::<String>("g", "k"));
        assert_eq!(cache_key::<Box<i64>>("g", "k"), cache_key::<i64>("g", "k"));
    }

    #[test]
    fn test_cache_key_separators_in_group_are_escaped() {
        assert_ne!(cache_key::<i32>("a:b", "c"), cache_key::<i32>("a", "b:c"));
        assert_eq!(cache_key::<i32>("a:b", "c"), r"i32:a\:b:c");
        assert_eq!(cache_key::<i32>("a", "b:c"), "i32:a:b:c");
        assert_ne!(cache_key::<i32>(r"a\", "b"), cache_key::<i32>(r"a\:b", ""));
    }

    #[tokio::test]
    async fn test_colon_groups_keep_values_apart() {
        let ctx = CacheContext::with_backend(Arc::new(DashMapCache::new("t")));
        ctx.set("tenant:1", "k", &1_i32).await.unwrap();
        ctx.set("tenant", "1:k", &2_i32).await.unwrap();
        assert_eq!(ctx.get::<i32>("tenant:1", "k").await.unwrap(), 1);
        assert_eq!(ctx.get::<i32>("tenant", "1:k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_is_accepted() {
        let ctx = CacheContext::with_backend(Arc::new(DashMapCache::new("t")));
        ctx.set_with_ttl(Duration::MAX, "g", "k", &5_u64).await.unwrap();
        assert_eq!(ctx.get::<u64>("g", "k").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_store_and_load_bypass_context() {
        let backend = DashMapCache::new("explicit");
        store(&backend, "g", "k", &vec![1_u8, 2, 3]).await.unwrap();
        assert_eq!(load::<Vec<u8>>(&backend, "g", "k").await.unwrap(), vec![1, 2, 3]);
        assert!(load::<i32>(&backend, "g", "k").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn test_get_set_opt_none_is_loader_empty() {
        let ctx = CacheContext::with_backend(Arc::new(DashMapCache::new("t")));
        let err = ctx
            .get_set_opt::<i32, _, _>(Duration::from_secs(5), "g", "k", false, || async { Ok(None) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::LoaderEmpty));
        assert!(ctx.get::<i32>("g", "k").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn test_same_key_different_types_do_not_collide() {
        let ctx = CacheContext::with_backend(Arc::new(DashMapCache::new("t")));
        ctx.set("g", "k", &7_u32).await.unwrap();
        ctx.set("g", "k", &"seven".to_string()).await.unwrap();
        assert_eq!(ctx.get::<u32>("g", "k").await.unwrap(), 7);
        assert_eq!(ctx.get::<String>("g", "k").await.unwrap(), "seven");

        ctx.delete::<u32>("g", "k").await.unwrap();
        assert!(ctx.get::<u32>("g", "k").await.unwrap_err().is_miss());
        assert_eq!(ctx.get::<String>("g", "k").await.unwrap(), "seven");
    }
}
