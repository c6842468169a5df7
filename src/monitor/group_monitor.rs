//! Group Monitor - queue-backed membership and staleness tracking

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::{Enqueue, MonitorTask, TaskQueue};
use super::{CacheMonitor, MembershipMode, MonitorConfig, MonitorStats, RESERVED_GROUP, is_untracked_group};
use crate::error::{CacheError, CacheResult, CombinedError};
use crate::facade::{cache_key, load, store_with_ttl};
use crate::traits::CacheBackend;

#[derive(Debug, Default)]
struct GroupState {
    /// Update record value this monitor last observed (or wrote) per group
    last_seen: HashMap<String, i64>,
    /// Members per group under [`MembershipMode::LocalOnly`]
    keys: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Default)]
struct MonitorCounters {
    queued: AtomicU64,
    inline: AtomicU64,
    processed: AtomicU64,
    persistence_failures: AtomicU64,
}

struct MonitorInner {
    id: Uuid,
    backend: Arc<dyn CacheBackend>,
    config: MonitorConfig,
    state: RwLock<GroupState>,
    /// Serializes read-modify-write of each persisted membership record
    membership_locks: DashMap<String, Arc<Mutex<()>>>,
    counters: MonitorCounters,
}

/// Monitor that stores its bookkeeping through a backend
///
/// - `update_cache` is pushed onto a bounded queue drained by
///   [`MonitorConfig::workers`] workers; when the queue is full, or before
///   [`start`](CacheMonitor::start), the registration runs on the caller.
/// - Group update records are Unix-millisecond timestamps kept strictly
///   increasing per monitor and group.
/// - Staleness checks compare the record read through the backend with every
///   member backend's own copy and with the value this monitor last saw.
/// - With [`MembershipMode::Persisted`] the membership record in the backend
///   is the only source of a group's keys, so an invalidation by any
///   instance is seen by all of them. Updates to one record are serialized
///   within this instance; writers in other processes are not coordinated.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ctx_cache::backends::DashMapCache;
/// use ctx_cache::{CacheMonitor, GroupMonitor, MonitorConfig};
///
/// # async fn example() -> ctx_cache::CacheResult<()> {
/// let monitor = GroupMonitor::new(Arc::new(DashMapCache::new("shared")), MonitorConfig::default());
/// monitor.start().await;
/// monitor.add_group_keys("users", &["user:1", "user:2"]).await?;
/// assert_eq!(monitor.get_group_keys("users").await?.len(), 2);
/// monitor.close().await;
/// # Ok(())
/// # }
/// ```
pub struct GroupMonitor {
    inner: Arc<MonitorInner>,
    queue: TaskQueue,
}

fn updated_key(group: &str) -> String {
    format!("{RESERVED_GROUP}_{group}_updated")
}

fn keys_key(group: &str) -> String {
    format!("{RESERVED_GROUP}_{group}_keys")
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

impl GroupMonitor {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, config: MonitorConfig) -> Self {
        let id = Uuid::new_v4();
        info!(
            monitor_id = %id,
            backend = %backend.name(),
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            membership = ?config.membership,
            "Initializing Group Monitor"
        );
        let queue = TaskQueue::new(config.queue_capacity);
        Self {
            inner: Arc::new(MonitorInner {
                id,
                backend,
                config,
                state: RwLock::new(GroupState::default()),
                membership_locks: DashMap::new(),
                counters: MonitorCounters::default(),
            }),
            queue,
        }
    }

    /// Identifier of this monitor instance, used in logs
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Whether the worker pool is accepting tasks
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    /// Queue an invalidation of `group`, running it inline when the queue
    /// cannot take it
    ///
    /// # Errors
    ///
    /// Only inline execution can fail; see [`CacheMonitor::delete_cache`].
    pub async fn schedule_delete(&self, group: &str) -> CacheResult<()> {
        if is_untracked_group(group) {
            return Ok(());
        }
        self.submit(MonitorTask::Invalidate {
            group: group.to_string(),
        })
        .await
    }

    async fn submit(&self, task: MonitorTask) -> CacheResult<()> {
        match self.queue.try_enqueue(task) {
            Enqueue::Queued => {
                self.inner.counters.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Enqueue::Rejected(task) => {
                self.inner.counters.inline.fetch_add(1, Ordering::Relaxed);
                self.inner.run(&task).await
            }
        }
    }
}

impl MonitorInner {
    /// Next update record for `group`, above both `floor` and anything this
    /// monitor saw before; recorded as last seen
    fn advance(&self, group: &str, floor: Option<i64>) -> i64 {
        let mut next = unix_millis();
        if let Some(floor) = floor {
            next = next.max(floor.saturating_add(1));
        }
        let mut state = self.state.write();
        if let Some(last) = state.last_seen.get(group) {
            next = next.max(last.saturating_add(1));
        }
        state.last_seen.insert(group.to_string(), next);
        next
    }

    async fn publish_update(&self, group: &str) -> CacheResult<i64> {
        let record = updated_key(group);
        // Another instance may have published within the same millisecond.
        let current = load::<i64>(&*self.backend, RESERVED_GROUP, &record).await.ok();
        let stamp = self.advance(group, current);
        store_with_ttl(
            &*self.backend,
            self.config.group_ttl,
            RESERVED_GROUP,
            &record,
            &stamp,
        )
        .await?;
        debug!(monitor_id = %self.id, group = %group, stamp, "published group update");
        Ok(stamp)
    }

    fn membership_lock(&self, group: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.membership_locks.entry(group.to_string()).or_default())
    }

    async fn load_membership(&self, group: &str) -> CacheResult<HashSet<String>> {
        match load::<HashSet<String>>(&*self.backend, RESERVED_GROUP, &keys_key(group)).await {
            Ok(persisted) => Ok(persisted),
            Err(CacheError::Miss) => Ok(HashSet::new()),
            Err(e) => Err(e),
        }
    }

    async fn persist_membership(&self, group: &str, keys: &[&str]) -> CacheResult<()> {
        let lock = self.membership_lock(group);
        let _guard = lock.lock().await;

        let mut members = self.load_membership(group).await?;
        members.extend(keys.iter().map(|key| (*key).to_string()));
        store_with_ttl(&*self.backend, self.config.group_ttl, RESERVED_GROUP, &keys_key(group), &members).await
    }

    async fn add_group_keys(&self, group: &str, keys: &[&str]) -> CacheResult<()> {
        if is_untracked_group(group) {
            return Ok(());
        }

        let mut combined = CombinedError::new();
        match self.config.membership {
            MembershipMode::Persisted => combined.collect(self.persist_membership(group, keys).await),
            MembershipMode::LocalOnly => {
                let mut state = self.state.write();
                state
                    .keys
                    .entry(group.to_string())
                    .or_default()
                    .extend(keys.iter().map(|key| (*key).to_string()));
            }
        }
        combined.collect(self.publish_update(group).await.map(|_| ()));

        let result = combined.into_result();
        if let Err(e) = &result {
            self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
            warn!(monitor_id = %self.id, group = %group, error = %e, "failed persisting group bookkeeping");
        }
        result
    }

    /// Every member backend (recursively) holds `expected` under `record`
    async fn members_agree(&self, record: &str, expected: i64) -> bool {
        let mut visited = HashSet::from([self.backend.name().to_string()]);
        let mut pending: Vec<Arc<dyn CacheBackend>> = self.backend.member_backends().into_values().collect();

        while let Some(member) = pending.pop() {
            if !visited.insert(member.name().to_string()) {
                continue;
            }
            match load::<i64>(&*member, RESERVED_GROUP, record).await {
                Ok(stamp) if stamp == expected => {}
                Ok(stamp) => {
                    debug!(backend = %member.name(), expected, stamp, "group update record differs across tiers");
                    return false;
                }
                Err(e) => {
                    debug!(backend = %member.name(), error = %e, "group update record unreadable on tier");
                    return false;
                }
            }
            pending.extend(member.member_backends().into_values());
        }
        true
    }

    async fn has_group_key_been_updated(&self, group: &str) -> bool {
        if is_untracked_group(group) {
            return false;
        }
        let record = updated_key(group);

        let persisted = match load::<i64>(&*self.backend, RESERVED_GROUP, &record).await {
            Ok(stamp) => stamp,
            Err(e) => {
                // Unknown group: start a record and report stale this once.
                debug!(monitor_id = %self.id, group = %group, error = %e, "no group update record");
                if let Err(e) = self.publish_update(group).await {
                    self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(monitor_id = %self.id, group = %group, error = %e, "failed initialising group update record");
                }
                return true;
            }
        };

        if !self.members_agree(&record, persisted).await {
            return true;
        }

        {
            let state = self.state.read();
            if state.last_seen.get(group) == Some(&persisted) {
                return false;
            }
        }
        self.state.write().last_seen.insert(group.to_string(), persisted);
        debug!(monitor_id = %self.id, group = %group, stamp = persisted, "group updated elsewhere");
        true
    }

    async fn get_group_keys(&self, group: &str) -> CacheResult<HashSet<String>> {
        if is_untracked_group(group) {
            return Ok(HashSet::new());
        }
        match self.config.membership {
            MembershipMode::Persisted => self.load_membership(group).await,
            MembershipMode::LocalOnly => Ok(self.state.read().keys.get(group).cloned().unwrap_or_default()),
        }
    }

    async fn delete_cache(&self, group: &str) -> CacheResult<()> {
        if is_untracked_group(group) {
            return Ok(());
        }

        let mut combined = CombinedError::new();
        let deleted = match self.config.membership {
            MembershipMode::Persisted => {
                let lock = self.membership_lock(group);
                let _guard = lock.lock().await;
                let keys = self.load_membership(group).await?;
                for key in &keys {
                    combined.collect(self.backend.delete(key).await);
                }
                let record = cache_key::<HashSet<String>>(RESERVED_GROUP, &keys_key(group));
                combined.collect(self.backend.delete(&record).await);
                keys.len()
            }
            MembershipMode::LocalOnly => {
                let keys = self.state.write().keys.remove(group).unwrap_or_default();
                for key in &keys {
                    combined.collect(self.backend.delete(key).await);
                }
                keys.len()
            }
        };
        // Other instances must see the group as stale after an explicit invalidation.
        combined.collect(self.publish_update(group).await.map(|_| ()));

        info!(
            monitor_id = %self.id,
            group = %group,
            keys = deleted,
            failures = combined.len(),
            "Invalidated cache group"
        );
        combined.into_result()
    }

    async fn run(&self, task: &MonitorTask) -> CacheResult<()> {
        match task {
            MonitorTask::Register { group, key } => self.add_group_keys(group, &[key.as_str()]).await,
            MonitorTask::Invalidate { group } => self.delete_cache(group).await,
        }
    }

    async fn process(&self, task: MonitorTask) {
        let result = self.run(&task).await;
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = result {
            warn!(monitor_id = %self.id, task = ?task, error = %e, "monitor task failed");
        }
    }
}

#[async_trait]
impl CacheMonitor for GroupMonitor {
    async fn add_group_keys(&self, group: &str, keys: &[&str]) -> CacheResult<()> {
        self.inner.add_group_keys(group, keys).await
    }

    async fn update_cache(&self, group: &str, key: &str) -> CacheResult<()> {
        if is_untracked_group(group) {
            return Ok(());
        }
        self.submit(MonitorTask::Register {
            group: group.to_string(),
            key: key.to_string(),
        })
        .await
    }

    async fn has_group_key_been_updated(&self, group: &str) -> bool {
        self.inner.has_group_key_been_updated(group).await
    }

    async fn get_group_keys(&self, group: &str) -> CacheResult<HashSet<String>> {
        self.inner.get_group_keys(group).await
    }

    async fn delete_cache(&self, group: &str) -> CacheResult<()> {
        self.inner.delete_cache(group).await
    }

    async fn start(&self) {
        let inner = Arc::clone(&self.inner);
        self.queue.start(self.inner.config.workers, move |task| {
            let inner = Arc::clone(&inner);
            async move { inner.process(task).await }
        });
    }

    async fn close(&self) {
        let leftovers = self.queue.shutdown(self.inner.config.shutdown_grace).await;
        if !leftovers.is_empty() {
            info!(monitor_id = %self.inner.id, tasks = leftovers.len(), "running undrained monitor tasks inline");
        }
        for task in leftovers {
            self.inner.counters.inline.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.inner.run(&task).await {
                warn!(monitor_id = %self.inner.id, task = ?task, error = %e, "monitor task failed");
            }
        }
    }

    fn stats(&self) -> MonitorStats {
        let counters = &self.inner.counters;
        MonitorStats {
            queued: counters.queued.load(Ordering::Relaxed),
            inline: counters.inline.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            persistence_failures: counters.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DashMapCache;
    use crate::facade::store;
    use crate::tiered_cache::{BackfillMode, TieredCache, TieredCacheConfig};
    use std::time::Duration;

    fn monitor_on(backend: Arc<dyn CacheBackend>) -> GroupMonitor {
        GroupMonitor::new(backend, MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let monitor = monitor_on(Arc::new(DashMapCache::new("shared")));
        let first = monitor.inner.advance("g", None);
        let second = monitor.inner.advance("g", None);
        let third = monitor.inner.advance("g", Some(i64::MAX - 1));
        assert!(first < second && second < third);
        assert_eq!(third, i64::MAX);
    }

    #[tokio::test]
    async fn test_unknown_group_reported_stale_once() {
        let monitor = monitor_on(Arc::new(DashMapCache::new("shared")));
        assert!(monitor.has_group_key_been_updated("fresh").await);
        assert!(!monitor.has_group_key_been_updated("fresh").await);
    }

    #[tokio::test]
    async fn test_reserved_group_is_never_stale_or_tracked() {
        let monitor = monitor_on(Arc::new(DashMapCache::new("shared")));
        monitor.add_group_keys(RESERVED_GROUP, &["x"]).await.unwrap();
        assert!(!monitor.has_group_key_been_updated(RESERVED_GROUP).await);
        assert!(monitor.get_group_keys(RESERVED_GROUP).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tier_disagreement_reports_stale() {
        let l1 = Arc::new(DashMapCache::new("l1"));
        let l2 = Arc::new(DashMapCache::new("l2"));
        let tiers: Vec<Arc<dyn CacheBackend>> = vec![l1.clone(), l2.clone()];
        let tiered = Arc::new(TieredCache::new(
            TieredCacheConfig {
                backfill: BackfillMode::Inline,
                ..TieredCacheConfig::default()
            },
            tiers,
        ));
        let monitor = monitor_on(tiered);

        monitor.add_group_keys("g", &["k"]).await.unwrap();
        assert!(!monitor.has_group_key_been_updated("g").await);

        // Another writer advanced only the lower tier.
        store(&*l2, RESERVED_GROUP, &updated_key("g"), &i64::MAX).await.unwrap();
        assert!(monitor.has_group_key_been_updated("g").await);
    }

    #[tokio::test]
    async fn test_local_only_membership_stays_in_memory() {
        let backend = Arc::new(DashMapCache::new("shared"));
        let config = MonitorConfig {
            membership: MembershipMode::LocalOnly,
            ..MonitorConfig::default()
        };
        let monitor = GroupMonitor::new(backend.clone(), config);
        monitor.add_group_keys("g", &["a", "b"]).await.unwrap();
        assert_eq!(monitor.get_group_keys("g").await.unwrap().len(), 2);

        let other = GroupMonitor::new(
            backend,
            MonitorConfig {
                membership: MembershipMode::LocalOnly,
                ..MonitorConfig::default()
            },
        );
        assert!(other.get_group_keys("g").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_record_is_the_only_membership_source() {
        let backend: Arc<dyn CacheBackend> = Arc::new(DashMapCache::new("shared"));
        let a = monitor_on(Arc::clone(&backend));
        let b = monitor_on(Arc::clone(&backend));
        backend.set("g", "old", b"v").await.unwrap();

        a.add_group_keys("g", &["old"]).await.unwrap();
        b.delete_cache("g").await.unwrap();
        assert!(a.get_group_keys("g").await.unwrap().is_empty());

        // A later registration by `a` must not bring "old" back.
        a.add_group_keys("g", &["new"]).await.unwrap();
        assert_eq!(b.get_group_keys("g").await.unwrap(), HashSet::from(["new".to_string()]));
    }

    #[tokio::test]
    async fn test_close_runs_tasks_left_by_aborted_workers() {
        let backend: Arc<dyn CacheBackend> = Arc::new(DashMapCache::new("shared"));
        let monitor = GroupMonitor::new(
            Arc::clone(&backend),
            MonitorConfig {
                workers: 1,
                shutdown_grace: Duration::ZERO,
                ..MonitorConfig::default()
            },
        );
        monitor.start().await;
        for i in 0..5 {
            monitor.update_cache("g", &format!("k{i}")).await.unwrap();
        }
        monitor.close().await;

        let stats = monitor.stats();
        assert_eq!(stats.queued, 5);
        assert_eq!(stats.processed + stats.inline, 5);
        assert_eq!(monitor.get_group_keys("g").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_update_before_start_runs_inline() {
        let monitor = monitor_on(Arc::new(DashMapCache::new("shared")));
        monitor.update_cache("g", "k").await.unwrap();
        assert!(monitor.get_group_keys("g").await.unwrap().contains("k"));
        assert_eq!(monitor.stats().inline, 1);
        assert_eq!(monitor.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_close_drains_queued_registrations() {
        let monitor = monitor_on(Arc::new(DashMapCache::new("shared")));
        monitor.start().await;
        monitor.start().await;
        for i in 0..20 {
            monitor.update_cache("g", &format!("k{i}")).await.unwrap();
        }
        monitor.close().await;
        monitor.close().await;

        let stats = monitor.stats();
        assert_eq!(stats.queued + stats.inline, 20);
        assert_eq!(monitor.get_group_keys("g").await.unwrap().len(), 20);
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_schedule_delete_clears_group() {
        let backend = Arc::new(DashMapCache::new("shared"));
        backend.set_with_ttl(Duration::from_secs(60), "g", "k1", b"v").await.unwrap();
        let monitor = monitor_on(backend.clone());
        monitor.add_group_keys("g", &["k1"]).await.unwrap();

        monitor.schedule_delete("g").await.unwrap();
        assert!(backend.get("g", "k1").await.unwrap_err().is_miss());
        assert!(monitor.get_group_keys("g").await.unwrap().is_empty());
    }
}
