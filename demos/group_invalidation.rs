//! Group Invalidation Example
//!
//! Two instances share one backend. Writes register keys with a group; one
//! instance invalidates the group and the other notices on its next read.
//!
//! Run with: cargo run --example `group_invalidation`

use std::sync::Arc;
use std::time::Duration;

use ctx_cache::{
    CacheBackend, CacheContext, CacheError, CacheMonitor, DashMapCache, FacadeOptions, GroupMonitor, MonitorConfig,
};
use tracing_subscriber::EnvFilter;

async fn instance(shared: &Arc<dyn CacheBackend>) -> (CacheContext, Arc<GroupMonitor>) {
    let monitor = Arc::new(GroupMonitor::new(Arc::clone(shared), MonitorConfig::from_env()));
    monitor.start().await;
    let ctx = CacheContext::new(
        Arc::clone(shared),
        monitor.clone(),
        FacadeOptions {
            track_staleness_on_read: true,
            ..FacadeOptions::default()
        },
    );
    (ctx, monitor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!("=== Context Cache: Group Invalidation ===\n");

    // Stands in for a Redis or Memcached deployment shared by both instances.
    let shared: Arc<dyn CacheBackend> = Arc::new(DashMapCache::new("shared"));
    let (api, api_monitor) = instance(&shared).await;
    let (worker, worker_monitor) = instance(&shared).await;

    for id in 1..=3_u32 {
        api.set("users", &format!("user:{id}"), &format!("user #{id}")).await?;
    }
    api.set("users", "count", &3_u32).await?;

    // Registrations are processed by the monitor's workers.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let members = api_monitor.get_group_keys("users").await?;
    println!("'users' group has {} members:", members.len());
    for key in &members {
        println!("   {key}");
    }

    // The worker sees the group as changed the first time, then trusts it.
    for read in 1..=2 {
        match worker.get::<u32>("users", "count").await {
            Ok(count) => println!("worker read {read}: count = {count}"),
            Err(CacheError::Updated) => println!("worker read {read}: group changed elsewhere, refetch"),
            Err(e) => println!("worker read {read}: {e}"),
        }
    }

    println!("\nWorker invalidates the group...");
    worker_monitor.delete_cache("users").await?;

    match api.get::<u32>("users", "count").await {
        Err(CacheError::Miss) => println!("api: count is gone"),
        other => println!("api: {other:?}"),
    }
    println!("api monitor stats: {:?}", api_monitor.stats());

    api.close().await?;
    worker.close().await?;
    println!("\n=== Done ===");
    Ok(())
}
