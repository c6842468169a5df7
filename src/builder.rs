//! Cache Context Builder
//!
//! Assembles a [`CacheContext`]: the backend (a single store, or tiers
//! composed into a [`TieredCache`]), the monitor and the facade options.
//!
//! # Example: Tiers with Group Monitoring
//!
//! ```rust
//! use std::sync::Arc;
//! use ctx_cache::backends::DashMapCache;
//! use ctx_cache::{CacheContextBuilder, MonitorConfig, MonitorKind};
//!
//! # async fn example() -> ctx_cache::CacheResult<()> {
//! let ctx = CacheContextBuilder::new()
//!     .with_tier(Arc::new(DashMapCache::new("l1")))
//!     .with_tier(Arc::new(DashMapCache::new("l2")))
//!     .with_monitor(MonitorKind::Group(MonitorConfig::default()))
//!     .build()
//!     .await;
//!
//! ctx.set("users", "user:1", &"alice".to_string()).await?;
//! ctx.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::context::{CacheContext, FacadeOptions, default_backend};
use crate::monitor::{CacheMonitor, GroupMonitor, MonitorConfig, NoopMonitor};
use crate::tiered_cache::{TieredCache, TieredCacheConfig};
use crate::traits::{CacheBackend, SourceLoader};

/// Monitor selection for [`CacheContextBuilder`]
#[derive(Debug, Clone, Default)]
pub enum MonitorKind {
    /// No coherence tracking
    #[default]
    Noop,
    /// [`GroupMonitor`] over the built backend, started by `build`
    Group(MonitorConfig),
}

/// Builder for [`CacheContext`]
///
/// # Default Behavior
///
/// With nothing configured, `build` uses the process default in-memory
/// backend and a [`NoopMonitor`].
///
/// Several tiers, or a single backend plus a loader, are composed into a
/// [`TieredCache`] in the order they were added.
#[derive(Default)]
pub struct CacheContextBuilder {
    tiers: Vec<Arc<dyn CacheBackend>>,
    tiered_config: TieredCacheConfig,
    loader: Option<Arc<dyn SourceLoader>>,
    monitor: MonitorKind,
    custom_monitor: Option<Arc<dyn CacheMonitor>>,
    options: FacadeOptions,
}

impl CacheContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `backend` alone, replacing any tiers added so far
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.tiers = vec![backend];
        self
    }

    /// Append a tier; earlier tiers are read first
    #[must_use]
    pub fn with_tier(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.tiers.push(backend);
        self
    }

    /// Configuration used when tiers are composed
    #[must_use]
    pub fn with_tiered_config(mut self, config: TieredCacheConfig) -> Self {
        self.tiered_config = config;
        self
    }

    /// Source of truth consulted when every tier misses
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn SourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, kind: MonitorKind) -> Self {
        self.monitor = kind;
        self
    }

    /// Use an already constructed monitor; takes precedence over [`with_monitor`](Self::with_monitor)
    #[must_use]
    pub fn with_custom_monitor(mut self, monitor: Arc<dyn CacheMonitor>) -> Self {
        self.custom_monitor = Some(monitor);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: FacadeOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the context, starting the monitor's workers
    pub async fn build(self) -> CacheContext {
        let backend: Arc<dyn CacheBackend> = match (self.tiers.len(), self.loader) {
            (0, None) => default_backend(),
            (1, None) => self.tiers.into_iter().next().unwrap_or_else(default_backend),
            (0, Some(loader)) => Arc::new(
                TieredCache::new(self.tiered_config, vec![default_backend()]).with_loader(loader),
            ),
            (_, loader) => {
                let tiered = TieredCache::new(self.tiered_config, self.tiers);
                Arc::new(match loader {
                    Some(loader) => tiered.with_loader(loader),
                    None => tiered,
                })
            }
        };

        let monitor: Arc<dyn CacheMonitor> = match (self.custom_monitor, self.monitor) {
            (Some(custom), _) => custom,
            (None, MonitorKind::Noop) => Arc::new(NoopMonitor),
            (None, MonitorKind::Group(config)) => Arc::new(GroupMonitor::new(Arc::clone(&backend), config)),
        };
        monitor.start().await;

        info!(
            backend = %backend.name(),
            track_staleness_on_read = self.options.track_staleness_on_read,
            coalesce_misses = self.options.coalesce_misses,
            "Cache context ready"
        );
        CacheContext::new(backend, monitor, self.options)
    }
}
