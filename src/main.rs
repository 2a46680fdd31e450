//! A small CLI demonstrating embedding a local bucket and, optionally, a
//! Redis-backed remote one behind the same `RateLimitedBucket` trait.

use bandwidth_limiter::bandwidth::Bandwidth;
use bandwidth_limiter::blocking::InterruptFlag;
use bandwidth_limiter::bucket::{self, RateLimitedBucket};
use bandwidth_limiter::config::GridConfig;
use bandwidth_limiter::grid::{ProxyManager, RecoveryStrategy};
use bandwidth_limiter::local_bucket::LocalBucket;
use bandwidth_limiter::redis_backend::RedisGridBackend;
use bandwidth_limiter::state::Configuration;
use std::time::Duration;

fn demo_local_bucket() -> anyhow::Result<()> {
    let configuration = Configuration::new(vec![
        Bandwidth::simple(100, Duration::from_secs(60))?,
        Bandwidth::simple(20, Duration::from_secs(10))?,
    ])?;
    let bucket = LocalBucket::new(configuration);

    println!("local bucket: 100/min, 20/10s");
    for i in 1..=25 {
        let allowed = bucket.try_consume(1)?;
        println!("  request {i}: {}", if allowed { "allowed" } else { "throttled" });
    }

    let interrupt = InterruptFlag::new();
    println!("blocking for the next available token...");
    bucket::consume(&bucket, 1, Duration::from_secs(5).as_nanos() as u64, &interrupt)?;
    println!("token acquired");
    Ok(())
}

fn demo_remote_bucket() {
    let grid_config = GridConfig::load("bandwidth-limiter");
    let backend = match RedisGridBackend::new(&grid_config.redis_url, grid_config.entry_ttl) {
        Ok(backend) => backend,
        Err(err) => {
            println!("skipping remote bucket demo: {err}");
            return;
        }
    };

    let proxy = ProxyManager::new(backend, RecoveryStrategy::Reconstruct);
    let bucket = proxy.get_proxy("demo:tenant-1", || {
        Configuration::new(vec![Bandwidth::simple(5, Duration::from_secs(30)).unwrap()]).unwrap()
    });

    let now_nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;

    match bucket.try_consume(1, now_nanos) {
        Ok(allowed) => println!("remote bucket: {}", if allowed { "allowed" } else { "throttled" }),
        Err(err) => println!("remote bucket unavailable: {err}"),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("bandwidth-limiter demo");
    demo_local_bucket()?;
    demo_remote_bucket();
    Ok(())
}
