//! Tiered Cache - Aggregate Backend
//!
//! Presents an ordered list of backends as a single [`CacheBackend`]:
//!
//! - **Reads** walk the tiers in order and stop at the first hit. Tiers that
//!   missed (or failed) before the hit are backfilled with the found value.
//! - **Writes and deletes** fan out to every tier. A failing tier never stops
//!   the others; all failures come back as one [`CombinedError`].
//! - When every tier misses, an optional [`SourceLoader`] is consulted. A
//!   loader failure is returned as-is and nothing is backfilled. Reads of
//!   the monitor's reserved group never reach the loader.
//!
//! Tier order is caller-controlled priority: put the fastest tier first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult, CombinedError};
use crate::monitor::is_reserved_group;
use crate::traits::{CacheBackend, MemberBackends, SourceLoader};

/// How missed tiers are repopulated after a hit further down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillMode {
    /// Spawn the backfill and return the value immediately
    #[default]
    Background,
    /// Finish the backfill before returning (deterministic, used in tests)
    Inline,
}

/// Configuration for [`TieredCache`]
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    pub name: String,
    pub backfill: BackfillMode,
    /// TTL reported by [`CacheBackend::default_ttl`]; tiers keep their own
    pub default_ttl: Duration,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            name: "tiered".to_string(),
            backfill: BackfillMode::Background,
            default_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct TieredCounters {
    tier_hits: Vec<AtomicU64>,
    misses: AtomicU64,
    loader_hits: AtomicU64,
    backfills: AtomicU64,
    backfill_failures: AtomicU64,
}

/// Snapshot of [`TieredCache`] counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TieredCacheStats {
    /// Hits per tier, in tier order
    pub tier_hits: Vec<u64>,
    /// Reads that no tier could answer
    pub misses: u64,
    /// Misses answered by the loader
    pub loader_hits: u64,
    /// Tier writes performed by backfill
    pub backfills: u64,
    pub backfill_failures: u64,
}

/// Ordered composition of backends behind the backend contract
pub struct TieredCache {
    config: TieredCacheConfig,
    tiers: Vec<Arc<dyn CacheBackend>>,
    loader: Option<Arc<dyn SourceLoader>>,
    counters: Arc<TieredCounters>,
}

impl TieredCache {
    /// Compose `tiers`, highest priority first
    #[must_use]
    pub fn new(config: TieredCacheConfig, tiers: Vec<Arc<dyn CacheBackend>>) -> Self {
        info!(
            name = %config.name,
            tiers = tiers.len(),
            backfill = ?config.backfill,
            "Initializing Tiered Cache"
        );
        let counters = Arc::new(TieredCounters {
            tier_hits: tiers.iter().map(|_| AtomicU64::new(0)).collect(),
            misses: AtomicU64::new(0),
            loader_hits: AtomicU64::new(0),
            backfills: AtomicU64::new(0),
            backfill_failures: AtomicU64::new(0),
        });
        Self {
            config,
            tiers,
            loader: None,
            counters,
        }
    }

    /// Consult `loader` when every tier misses
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn SourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Member tiers in priority order
    #[must_use]
    pub fn tiers(&self) -> &[Arc<dyn CacheBackend>] {
        &self.tiers
    }

    #[must_use]
    pub fn stats(&self) -> TieredCacheStats {
        TieredCacheStats {
            tier_hits: self
                .counters
                .tier_hits
                .iter()
                .map(|hits| hits.load(Ordering::Relaxed))
                .collect(),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loader_hits: self.counters.loader_hits.load(Ordering::Relaxed),
            backfills: self.counters.backfills.load(Ordering::Relaxed),
            backfill_failures: self.counters.backfill_failures.load(Ordering::Relaxed),
        }
    }

    async fn backfill(&self, missed: Vec<Arc<dyn CacheBackend>>, group: &str, key: &str, value: &[u8]) {
        if missed.is_empty() {
            return;
        }
        let counters = Arc::clone(&self.counters);
        match self.config.backfill {
            BackfillMode::Inline => backfill_tiers(missed, group, key, value, &counters).await,
            BackfillMode::Background => {
                let group = group.to_string();
                let key = key.to_string();
                let value = value.to_vec();
                tokio::spawn(async move {
                    backfill_tiers(missed, &group, &key, &value, &counters).await;
                });
            }
        }
    }

    /// Fold per-tier results into one, logging each failure
    fn combine(&self, results: Vec<CacheResult<()>>) -> CacheResult<()> {
        let mut combined = CombinedError::new();
        for (tier, result) in self.tiers.iter().zip(results) {
            if let Err(e) = result {
                warn!(tiered = %self.config.name, backend = %tier.name(), error = %e, "tier operation failed");
                combined.push(e);
            }
        }
        combined.into_result()
    }
}

async fn backfill_tiers(
    missed: Vec<Arc<dyn CacheBackend>>,
    group: &str,
    key: &str,
    value: &[u8],
    counters: &TieredCounters,
) {
    let results = join_all(missed.iter().map(|tier| tier.set(group, key, value))).await;
    for (tier, result) in missed.iter().zip(results) {
        match result {
            Ok(()) => {
                counters.backfills.fetch_add(1, Ordering::Relaxed);
                debug!(backend = %tier.name(), group = %group, key = %key, "backfilled tier");
            }
            Err(e) => {
                counters.backfill_failures.fetch_add(1, Ordering::Relaxed);
                warn!(backend = %tier.name(), key = %key, error = %e, "failed backfilling tier");
            }
        }
    }
}

#[async_trait]
impl CacheBackend for TieredCache {
    async fn get(&self, group: &str, key: &str) -> CacheResult<Vec<u8>> {
        let mut missed = Vec::new();

        for (idx, tier) in self.tiers.iter().enumerate() {
            match tier.get(group, key).await {
                Ok(value) => {
                    if let Some(hits) = self.counters.tier_hits.get(idx) {
                        hits.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(backend = %tier.name(), tier = idx, key = %key, "tier hit");
                    self.backfill(missed, group, key, &value).await;
                    return Ok(value);
                }
                Err(CacheError::Miss) => missed.push(Arc::clone(tier)),
                Err(e) => {
                    // A failing tier counts as a miss for this read.
                    debug!(backend = %tier.name(), key = %key, error = %e, "tier read failed");
                    missed.push(Arc::clone(tier));
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        // Monitor bookkeeping has no source of truth behind the tiers.
        let Some(loader) = self.loader.as_ref().filter(|_| !is_reserved_group(group)) else {
            return Err(CacheError::Miss);
        };

        let value = loader.load(group, key).await?;
        self.counters.loader_hits.fetch_add(1, Ordering::Relaxed);
        debug!(tiered = %self.config.name, group = %group, key = %key, "loaded from source");
        self.backfill(missed, group, key, &value).await;
        Ok(value)
    }

    async fn set(&self, group: &str, key: &str, value: &[u8]) -> CacheResult<()> {
        let results = join_all(self.tiers.iter().map(|tier| tier.set(group, key, value))).await;
        self.combine(results)
    }

    async fn set_with_ttl(&self, ttl: Duration, group: &str, key: &str, value: &[u8]) -> CacheResult<()> {
        let results = join_all(
            self.tiers
                .iter()
                .map(|tier| tier.set_with_ttl(ttl, group, key, value)),
        )
        .await;
        self.combine(results)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let results = join_all(self.tiers.iter().map(|tier| tier.delete(key))).await;
        self.combine(results)
    }

    async fn ping(&self) -> CacheResult<()> {
        let results = join_all(self.tiers.iter().map(|tier| tier.ping())).await;
        self.combine(results)
    }

    async fn close(&self) -> CacheResult<()> {
        let results = join_all(self.tiers.iter().map(|tier| tier.close())).await;
        self.combine(results)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    fn member_backends(&self) -> MemberBackends {
        self.tiers
            .iter()
            .enumerate()
            .map(|(idx, tier)| (format!("{idx}:{}", tier.name()), Arc::clone(tier)))
            .collect()
    }
}
