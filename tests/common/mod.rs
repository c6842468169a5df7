//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Unique key generation
//! - Test data types
//! - A backend double whose failures can be toggled
//! - Polling helper for background effects

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use ctx_cache::{CacheBackend, CacheError, CacheResult, DashMapCache, async_trait};

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            }
        }
    }

    ctx_cache::impl_cacheable!(User);

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Product {
        pub id: u64,
        pub name: String,
        pub price: f64,
        pub tags: Vec<String>,
    }

    impl Product {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("Product {id}"),
                price: 99.99 + f64::from(u32::try_from(id).unwrap_or(0)),
                tags: vec![format!("category-{}", id % 5)],
            }
        }
    }

    ctx_cache::impl_cacheable!(Product);
}

/// In-memory backend whose reads and writes can be made to fail or slow
pub struct FlakyBackend {
    inner: DashMapCache,
    name: String,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    latency_ms: AtomicU64,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: DashMapCache::with_default_ttl(name, Duration::from_secs(60)),
            name: name.to_string(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        })
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every read and write by `ms` milliseconds
    pub fn set_latency(&self, ms: u64) {
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    async fn lag(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Whether a raw key is currently stored
    pub async fn contains(&self, key: &str) -> bool {
        self.inner.get("", key).await.is_ok()
    }

    fn refused(&self, op: &str) -> CacheError {
        CacheError::backend(self.name.clone(), anyhow::anyhow!("{op} refused"))
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, group: &str, key: &str) -> CacheResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.lag().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(self.refused("read"));
        }
        self.inner.get(group, key).await
    }

    async fn set_with_ttl(&self, ttl: Duration, group: &str, key: &str, value: &[u8]) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.lag().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.refused("write"));
        }
        self.inner.set_with_ttl(ttl, group, key, value).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.refused("delete"));
        }
        self.inner.delete(key).await
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        self.inner.close().await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_ttl(&self) -> Duration {
        self.inner.default_ttl()
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    use tokio::time::{Duration, sleep};

    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    false
}

/// Async flavour of [`wait_for`] for conditions that hit a backend
pub async fn eventually<F, Fut>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);

    while std::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("user");
        let key2 = test_key("user");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_user_"));
    }

    #[test]
    fn test_data_generation() {
        let user = test_data::User::new(123);
        assert_eq!(user.id, 123);
        assert_eq!(user.name, "User 123");
        assert_eq!(user.email, "user123@example.com");
    }
}
