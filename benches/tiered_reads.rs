//! Benchmarks for reads through the facade
//!
//! Measures:
//! - Single-tier hits
//! - Two-tier hits served by the first tier
//! - Lower-tier hits that backfill the first tier
//! - Reads with staleness tracking enabled

use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ctx_cache::{
    BackfillMode, CacheBackend, CacheContext, DashMapCache, FacadeOptions, GroupMonitor, MonitorConfig, TieredCache,
    TieredCacheConfig, cache_key,
};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"))
}

fn tiered(l1: Arc<DashMapCache>, l2: Arc<DashMapCache>) -> Arc<TieredCache> {
    Arc::new(TieredCache::new(
        TieredCacheConfig {
            backfill: BackfillMode::Inline,
            ..TieredCacheConfig::default()
        },
        vec![l1, l2],
    ))
}

fn bench_hits(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("facade_hit");

    let single = CacheContext::with_backend(Arc::new(DashMapCache::new("single")));
    let two_tier = CacheContext::with_backend(tiered(
        Arc::new(DashMapCache::new("l1")),
        Arc::new(DashMapCache::new("l2")),
    ));
    rt.block_on(async {
        single.set("bench", "k", &42_u64).await.unwrap_or_else(|_| panic!("Failed to set cache"));
        two_tier.set("bench", "k", &42_u64).await.unwrap_or_else(|_| panic!("Failed to set cache"));
    });

    group.bench_function("single_tier", |b| {
        b.to_async(&rt).iter(|| async { black_box(single.get::<u64>("bench", "k").await) });
    });
    group.bench_function("two_tier_l1", |b| {
        b.to_async(&rt).iter(|| async { black_box(two_tier.get::<u64>("bench", "k").await) });
    });

    group.finish();
}

fn bench_backfill(c: &mut Criterion) {
    let rt = runtime();
    let l1 = Arc::new(DashMapCache::new("l1"));
    let l2 = Arc::new(DashMapCache::new("l2"));
    let ctx = CacheContext::with_backend(tiered(l1.clone(), l2.clone()));
    let composite = cache_key::<u64>("bench", "k");
    rt.block_on(async {
        l2.set("bench", &composite, b"42").await.unwrap_or_else(|_| panic!("Failed to set cache"));
    });

    c.bench_function("facade_l2_hit_with_backfill", |b| {
        b.to_async(&rt).iter(|| async {
            // Evict from L1 so every read falls through.
            let _ = l1.delete(&composite).await;
            black_box(ctx.get::<u64>("bench", "k").await)
        });
    });
}

fn bench_staleness_tracking(c: &mut Criterion) {
    let rt = runtime();
    let backend: Arc<dyn CacheBackend> = Arc::new(DashMapCache::new("shared"));
    let monitor = Arc::new(GroupMonitor::new(Arc::clone(&backend), MonitorConfig::default()));
    let ctx = CacheContext::new(
        backend,
        monitor,
        FacadeOptions {
            track_staleness_on_read: true,
            ..FacadeOptions::default()
        },
    );
    rt.block_on(async {
        ctx.set("bench", "k", &42_u64).await.unwrap_or_else(|_| panic!("Failed to set cache"));
    });

    let mut group = c.benchmark_group("staleness_tracking");
    group.measurement_time(Duration::from_secs(5));
    group.bench_function("get_tracked", |b| {
        b.to_async(&rt).iter(|| async { black_box(ctx.get::<u64>("bench", "k").await) });
    });
    group.finish();
}

criterion_group!(benches, bench_hits, bench_backfill, bench_staleness_tracking);
criterion_main!(benches);
