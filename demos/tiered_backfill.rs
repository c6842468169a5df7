//! Tiered Backfill Example
//!
//! A fast in-process tier in front of a shared tier, with a loader behind both.
//! Uses Redis as the second tier when `REDIS_URL` points at a reachable server.
//!
//! Run with: cargo run --example `tiered_backfill`

use std::sync::Arc;
use std::time::Duration;

use ctx_cache::{
    BackfillMode, CacheBackend, CacheContextBuilder, CacheError, DashMapCache, MokaCache, MokaCacheConfig,
    RedisCache, TieredCache, TieredCacheConfig,
};
use tracing_subscriber::EnvFilter;

async fn second_tier() -> Arc<dyn CacheBackend> {
    match RedisCache::new().await {
        Ok(redis) => Arc::new(redis),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, using an in-memory second tier");
            Arc::new(DashMapCache::new("l2-memory"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .init();

    println!("=== Context Cache: Tiered Backfill ===\n");

    let l1 = Arc::new(MokaCache::new(MokaCacheConfig {
        name: "l1".to_string(),
        default_ttl: Duration::from_secs(30),
        ..MokaCacheConfig::default()
    }));
    let l2 = second_tier().await;

    let loader = |group: String, key: String| async move {
        tracing::info!(%group, %key, "loading from source of truth");
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok::<_, CacheError>(format!("report for {key}").into_bytes())
    };

    let tiered = Arc::new(
        TieredCache::new(
            TieredCacheConfig {
                name: "app".to_string(),
                backfill: BackfillMode::Inline,
                ..TieredCacheConfig::default()
            },
            vec![l1.clone(), l2.clone()],
        )
        .with_loader(Arc::new(loader)),
    );
    let ctx = CacheContextBuilder::new().with_backend(tiered.clone()).build().await;

    // All tiers miss: the loader answers and both tiers are filled.
    let report: String = ctx.get("reports", "daily").await?;
    println!("first read: {report}");

    // Drop the L1 copy: the next read hits L2 and backfills L1.
    l1.delete(&ctx_cache::cache_key::<String>("reports", "daily")).await?;
    let report: String = ctx.get("reports", "daily").await?;
    println!("after L1 eviction: {report}");

    let report: String = ctx.get("reports", "daily").await?;
    println!("served by L1 again: {report}");

    println!("\ntiered stats: {:?}", tiered.stats());
    println!("l1 stats: {:?}", l1.stats());

    ctx.close().await?;
    println!("\n=== Done ===");
    Ok(())
}
