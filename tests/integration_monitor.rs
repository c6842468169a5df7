//! Integration tests for group monitoring
//!
//! Tests membership, group invalidation and cross-instance staleness

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use ctx_cache::{
    CacheBackend, CacheContext, CacheContextBuilder, CacheError, CacheMonitor, DashMapCache, FacadeOptions,
    GroupMonitor, MonitorConfig, MonitorKind, cache_key,
};

fn shared_backend() -> Arc<dyn CacheBackend> {
    Arc::new(DashMapCache::new("shared"))
}

fn monitor(backend: &Arc<dyn CacheBackend>) -> Arc<GroupMonitor> {
    Arc::new(GroupMonitor::new(Arc::clone(backend), MonitorConfig::default()))
}

#[tokio::test]
async fn test_group_membership_and_invalidation() {
    let backend = shared_backend();
    let m = monitor(&backend);
    for key in ["k1", "k2", "k3"] {
        backend.set("users", key, b"v").await.unwrap();
    }

    m.add_group_keys("users", &["k1", "k2", "k3"]).await.unwrap();
    let expected: HashSet<String> = ["k1", "k2", "k3"].iter().map(ToString::to_string).collect();
    assert_eq!(m.get_group_keys("users").await.unwrap(), expected);

    m.delete_cache("users").await.unwrap();
    assert!(m.get_group_keys("users").await.unwrap().is_empty());
    for key in ["k1", "k2", "k3"] {
        assert!(backend.get("users", key).await.unwrap_err().is_miss());
    }
}

#[tokio::test]
async fn test_membership_is_shared_through_backend() {
    let backend = shared_backend();
    let writer = monitor(&backend);
    let reader = monitor(&backend);
    backend.set("orders", "o1", b"v").await.unwrap();

    writer.add_group_keys("orders", &["o1"]).await.unwrap();
    assert!(reader.get_group_keys("orders").await.unwrap().contains("o1"));

    // Either instance can invalidate what the other registered.
    reader.delete_cache("orders").await.unwrap();
    assert!(backend.get("orders", "o1").await.unwrap_err().is_miss());
    assert!(writer.get_group_keys("orders").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cross_instance_staleness() {
    let backend = shared_backend();
    let a = monitor(&backend);
    let b = monitor(&backend);

    // First sight of a group initialises its record.
    assert!(a.has_group_key_been_updated("g").await);
    assert!(!a.has_group_key_been_updated("g").await);

    b.add_group_keys("g", &["x"]).await.unwrap();
    assert!(!b.has_group_key_been_updated("g").await);
    assert!(a.has_group_key_been_updated("g").await);
    assert!(!a.has_group_key_been_updated("g").await);

    // Invalidation is a change too.
    b.delete_cache("g").await.unwrap();
    assert!(a.has_group_key_been_updated("g").await);
    assert!(!a.has_group_key_been_updated("g").await);
}

#[tokio::test]
async fn test_delete_cache_reports_every_failure() {
    let flaky = FlakyBackend::new("flaky");
    let backend: Arc<dyn CacheBackend> = flaky.clone();
    let m = monitor(&backend);
    m.add_group_keys("g", &["k1", "k2"]).await.unwrap();

    flaky.fail_writes(true);
    match m.delete_cache("g").await {
        // Two member keys, the membership record and the update record.
        Err(CacheError::Combined(errors)) => assert_eq!(errors.len(), 4),
        other => panic!("expected combined error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bookkeeping_failure_is_counted() {
    let flaky = FlakyBackend::new("flaky");
    let backend: Arc<dyn CacheBackend> = flaky.clone();
    let m = monitor(&backend);
    flaky.fail_writes(true);

    assert!(m.add_group_keys("g", &["k"]).await.is_err());
    assert_eq!(m.stats().persistence_failures, 1);
    // Nothing reached the backend, so nothing is reported as a member.
    flaky.fail_writes(false);
    assert!(m.get_group_keys("g").await.unwrap().is_empty());

    m.add_group_keys("g", &["k"]).await.unwrap();
    assert!(m.get_group_keys("g").await.unwrap().contains("k"));
    assert_eq!(m.stats().persistence_failures, 1);
}

#[tokio::test]
async fn test_invalidated_keys_do_not_come_back() {
    let backend = shared_backend();
    let a = monitor(&backend);
    let b = monitor(&backend);

    a.add_group_keys("orders", &["o1", "o2"]).await.unwrap();
    b.delete_cache("orders").await.unwrap();
    a.add_group_keys("orders", &["o3"]).await.unwrap();

    let expected = HashSet::from(["o3".to_string()]);
    assert_eq!(a.get_group_keys("orders").await.unwrap(), expected);
    assert_eq!(b.get_group_keys("orders").await.unwrap(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_are_all_persisted() {
    let flaky = FlakyBackend::new("slow");
    flaky.set_latency(2);
    let backend: Arc<dyn CacheBackend> = flaky.clone();
    let writer = monitor(&backend);
    writer.start().await;

    const N: usize = 64;
    for i in 0..N {
        writer.update_cache("hot", &format!("k{i}")).await.unwrap();
    }
    writer.close().await;

    // A fresh instance only sees what reached the shared record.
    let reader = monitor(&backend);
    let keys = reader.get_group_keys("hot").await.unwrap();
    assert_eq!(keys.len(), N);
    assert!((0..N).all(|i| keys.contains(&format!("k{i}"))));
}

#[tokio::test]
async fn test_full_queue_runs_registrations_inline() {
    let backend = shared_backend();
    let m = Arc::new(GroupMonitor::new(
        Arc::clone(&backend),
        MonitorConfig {
            queue_capacity: 1,
            workers: 1,
            ..MonitorConfig::default()
        },
    ));
    m.start().await;

    const N: u64 = 50;
    for i in 0..N {
        m.update_cache("burst", &format!("k{i}")).await.unwrap();
    }
    let stats = m.stats();
    assert!(stats.inline > 0);
    assert_eq!(stats.queued + stats.inline, N);

    m.close().await;
    assert_eq!(m.stats().processed, m.stats().queued);
    assert_eq!(m.get_group_keys("burst").await.unwrap().len(), 50);
}

#[tokio::test]
async fn test_facade_writes_register_composite_keys() {
    let backend = shared_backend();
    let m = monitor(&backend);
    let ctx = CacheContext::new(Arc::clone(&backend), m.clone(), FacadeOptions::default());

    ctx.set("catalog", "p1", &test_data::Product::new(1)).await.unwrap();
    ctx.set("catalog", "count", &1_u32).await.unwrap();

    let expected = HashSet::from([
        cache_key::<test_data::Product>("catalog", "p1"),
        cache_key::<u32>("catalog", "count"),
    ]);
    assert_eq!(m.get_group_keys("catalog").await.unwrap(), expected);

    m.delete_cache("catalog").await.unwrap();
    assert!(ctx.get::<test_data::Product>("catalog", "p1").await.unwrap_err().is_miss());
    assert!(ctx.get::<u32>("catalog", "count").await.unwrap_err().is_miss());
}

#[tokio::test]
async fn test_started_monitor_registers_in_background() {
    let ctx = CacheContextBuilder::new()
        .with_backend(shared_backend())
        .with_monitor(MonitorKind::Group(MonitorConfig::default()))
        .build()
        .await;

    for i in 0..10 {
        ctx.set("events", &format!("e{i}"), &i).await.unwrap();
    }
    let monitor = Arc::clone(ctx.monitor());
    assert!(
        eventually(
            || {
                let monitor = Arc::clone(&monitor);
                async move { monitor.get_group_keys("events").await.map(|keys| keys.len() == 10).unwrap_or(false) }
            },
            2000
        )
        .await
    );

    ctx.close().await.unwrap();
    assert_eq!(ctx.monitor().stats().processed, 10);
}
