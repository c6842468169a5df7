//! Request-Scoped Cache Context
//!
//! A [`CacheContext`] bundles the active backend, the monitor and the facade
//! options. It is bound to a task with [`CacheContext::scope`]; facade calls
//! made inside the scope use it. Outside any scope the process-wide default
//! is used: an in-memory backend with a [`NoopMonitor`], built on first use.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::CacheResult;
use crate::monitor::{CacheMonitor, NoopMonitor};
use crate::traits::CacheBackend;

/// Behaviour switches for the typed facade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FacadeOptions {
    /// `get` fails with [`CacheError::Updated`](crate::CacheError::Updated)
    /// when the monitor reports the group stale
    pub track_staleness_on_read: bool,
    /// Concurrent `get_set` misses on the same key share one loader call
    pub coalesce_misses: bool,
}

tokio::task_local! {
    static CURRENT: CacheContext;
}

static DEFAULT_CONTEXT: OnceLock<CacheContext> = OnceLock::new();

struct ContextInner {
    backend: Arc<dyn CacheBackend>,
    monitor: Arc<dyn CacheMonitor>,
    options: FacadeOptions,
    /// Per composite key locks for miss coalescing
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

/// Active backend, monitor and options for facade calls
///
/// Cloning is cheap; clones share the same backend and monitor.
#[derive(Clone)]
pub struct CacheContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("backend", &self.inner.backend.name())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl CacheContext {
    pub fn new(backend: Arc<dyn CacheBackend>, monitor: Arc<dyn CacheMonitor>, options: FacadeOptions) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                backend,
                monitor,
                options,
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Context over `backend` with no coherence tracking
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self::new(backend, Arc::new(NoopMonitor), FacadeOptions::default())
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.inner.backend
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<dyn CacheMonitor> {
        &self.inner.monitor
    }

    #[must_use]
    pub fn options(&self) -> FacadeOptions {
        self.inner.options
    }

    pub(crate) fn in_flight(&self) -> &DashMap<String, Arc<Mutex<()>>> {
        &self.inner.in_flight
    }

    /// Run `fut` with this context bound as the current one
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The bound context, or the process-wide default outside any scope
    #[must_use]
    pub fn current() -> Self {
        CURRENT
            .try_with(Clone::clone)
            .unwrap_or_else(|_| Self::process_default().clone())
    }

    /// Lazily built default: a local in-memory backend and a [`NoopMonitor`]
    pub fn process_default() -> &'static Self {
        DEFAULT_CONTEXT.get_or_init(|| {
            let backend = default_backend();
            info!(backend = %backend.name(), "Initializing process-wide default cache context");
            Self::with_backend(backend)
        })
    }

    /// Stop the monitor, then close the backend
    ///
    /// # Errors
    ///
    /// Returns the backend's close error.
    pub async fn close(&self) -> CacheResult<()> {
        self.inner.monitor.close().await;
        self.inner.backend.close().await
    }
}

#[cfg(feature = "moka")]
pub(crate) fn default_backend() -> Arc<dyn CacheBackend> {
    Arc::new(crate::backends::MokaCache::default())
}

#[cfg(not(feature = "moka"))]
pub(crate) fn default_backend() -> Arc<dyn CacheBackend> {
    Arc::new(crate::backends::DashMapCache::new("default"))
}
