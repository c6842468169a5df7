//! Basic Usage Example
//!
//! Typed reads and writes, cache-aside loading and request scoping.
//!
//! Run with: cargo run --example `basic_usage`

use std::time::Duration;

use ctx_cache::{CacheContext, CacheError, MokaCache, MokaCacheConfig, facade};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    id: u32,
    name: String,
    price: f64,
}

ctx_cache::impl_cacheable!(Product);

async fn fetch_product(id: u32) -> anyhow::Result<Product> {
    tracing::info!(id, "fetching product from database (expensive)");
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(Product {
        id,
        name: format!("Product {id}"),
        price: 100.0 + f64::from(id),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!("=== Context Cache: Basic Usage ===\n");

    // Without a bound context the process default is used.
    facade::set("counters", "visits", &123_i64).await?;
    println!("visits = {}", facade::get::<i64>("counters", "visits").await?);

    match facade::get::<i64>("counters", "unknown").await {
        Err(CacheError::Miss) => println!("unknown counter: cache missed"),
        other => println!("unexpected: {other:?}"),
    }

    // Same (group, key) with a different type is a different entry.
    facade::set("counters", "visits", &"many".to_string()).await?;
    println!(
        "visits as i64 = {}, as String = {}",
        facade::get::<i64>("counters", "visits").await?,
        facade::get::<String>("counters", "visits").await?
    );

    // Bind a dedicated backend for one unit of work.
    let ctx = CacheContext::with_backend(std::sync::Arc::new(MokaCache::new(MokaCacheConfig {
        name: "request".to_string(),
        ..MokaCacheConfig::default()
    })));

    ctx.scope(async {
        for attempt in 1..=3 {
            let started = std::time::Instant::now();
            let product = facade::get_set(Duration::from_secs(60), "products", "42", false, || fetch_product(42)).await?;
            println!("attempt {attempt}: {product:?} in {:?}", started.elapsed());
        }

        // Skip the cached copy and reload.
        let product = facade::get_set(Duration::from_secs(60), "products", "42", true, || fetch_product(42)).await?;
        println!("forced refresh: {product:?}");
        Ok::<_, anyhow::Error>(())
    })
    .await?;

    println!("\n=== Done ===");
    Ok(())
}
