//! Cache Monitor
//!
//! Tracks which keys belong to which invalidation group and decides whether
//! a group's cached values are still trustworthy.
//!
//! Every group has an *update record*: a timestamp stored through the cache
//! itself under [`RESERVED_GROUP`]. Any process that writes to the group
//! advances the record, so another process reading the same backend sees a
//! value different from the one it last observed and reports the group stale.
//!
//! Two implementations ship with the crate:
//!
//! - [`GroupMonitor`]: membership + staleness tracking with a bounded task
//!   queue drained by a worker pool
//! - [`NoopMonitor`]: tracks nothing and never reports staleness

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

mod group_monitor;
mod queue;

pub use group_monitor::GroupMonitor;

/// Group name reserved for the monitor's own bookkeeping entries
pub const RESERVED_GROUP: &str = "[CTX_CACHE_GROUP]";

/// `true` for the monitor's own bookkeeping group, in any letter case
#[must_use]
pub fn is_reserved_group(group: &str) -> bool {
    group.eq_ignore_ascii_case(RESERVED_GROUP)
}

/// `true` for group names the monitor never tracks
#[must_use]
pub fn is_untracked_group(group: &str) -> bool {
    group.is_empty() || is_reserved_group(group)
}

/// Where group membership lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipMode {
    /// Membership is mirrored into the backend so other processes can
    /// enumerate and delete a group's keys
    #[default]
    Persisted,
    /// Membership stays in process memory; only the update record is shared
    LocalOnly,
}

/// Configuration for [`GroupMonitor`]
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Bound of the pending task queue
    pub queue_capacity: usize,
    /// Number of queue workers started by [`CacheMonitor::start`]
    pub workers: usize,
    /// TTL of group update records and persisted membership
    pub group_ttl: Duration,
    pub membership: MembershipMode,
    /// How long [`CacheMonitor::close`] waits for workers before aborting them
    pub shutdown_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            workers: 16,
            group_ttl: Duration::from_secs(60 * 60),
            membership: MembershipMode::Persisted,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by `CTX_CACHE_MONITOR_WORKERS`,
    /// `CTX_CACHE_MONITOR_QUEUE_SIZE` and `CTX_CACHE_MONITOR_GROUP_TTL_SECS`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = env_number("CTX_CACHE_MONITOR_WORKERS") {
            config.workers = usize::try_from(workers).unwrap_or(config.workers).max(1);
        }
        if let Some(size) = env_number("CTX_CACHE_MONITOR_QUEUE_SIZE") {
            config.queue_capacity = usize::try_from(size).unwrap_or(config.queue_capacity).max(1);
        }
        if let Some(secs) = env_number("CTX_CACHE_MONITOR_GROUP_TTL_SECS") {
            config.group_ttl = Duration::from_secs(secs);
        }
        config
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Snapshot of monitor activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Tasks handed to the worker pool
    pub queued: u64,
    /// Tasks executed on the caller because the queue was full or not running
    pub inline: u64,
    /// Tasks completed by workers
    pub processed: u64,
    /// Failed writes of group bookkeeping
    pub persistence_failures: u64,
}

/// Group membership and staleness tracking
///
/// Staleness checks never fail: any error while reading update records is
/// reported as "stale" so callers refetch.
#[async_trait]
pub trait CacheMonitor: Send + Sync {
    /// Register `keys` as members of `group` and advance its update record.
    /// No-op for the reserved group and the empty group.
    async fn add_group_keys(&self, group: &str, keys: &[&str]) -> CacheResult<()>;

    /// Single-key registration invoked after every facade write. Queued when
    /// possible, performed inline otherwise.
    async fn update_cache(&self, group: &str, key: &str) -> CacheResult<()>;

    /// Whether `group` changed since this monitor last looked
    async fn has_group_key_been_updated(&self, group: &str) -> bool;

    /// Tracked members of `group`; an unknown group yields an empty set.
    /// With persisted membership the shared record is the only source.
    async fn get_group_keys(&self, group: &str) -> CacheResult<HashSet<String>>;

    /// Delete every member of `group` from the backend and clear the membership
    async fn delete_cache(&self, group: &str) -> CacheResult<()>;

    /// Start background workers; repeated calls are no-ops
    async fn start(&self) {}

    /// Stop background workers; repeated calls are no-ops
    async fn close(&self) {}

    fn stats(&self) -> MonitorStats {
        MonitorStats::default()
    }
}

/// Monitor that tracks nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

#[async_trait]
impl CacheMonitor for NoopMonitor {
    async fn add_group_keys(&self, _group: &str, _keys: &[&str]) -> CacheResult<()> {
        Ok(())
    }

    async fn update_cache(&self, _group: &str, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn has_group_key_been_updated(&self, _group: &str) -> bool {
        false
    }

    async fn get_group_keys(&self, _group: &str) -> CacheResult<HashSet<String>> {
        Ok(HashSet::new())
    }

    async fn delete_cache(&self, _group: &str) -> CacheResult<()> {
        Ok(())
    }
}
