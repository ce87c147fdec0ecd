//! Memcached Backend Integration Tests
//!
//! These tests require a running Memcached instance and skip themselves when
//! none is reachable.
//!
//! ```bash
//! docker run --rm -p 11211:11211 memcached:1.6
//! cargo test --features memcached --test memcached_integration_test
//! ```
//!
//! **Note:** Tests use unique keys to avoid conflicts when run in parallel.
//!
//! ## Environment Variables
//!
//! - `TEST_MEMCACHED_URL`: Memcached server address (default: "localhost:11211")

#![cfg(feature = "memcached")]

use ledger_cache::backend::{CacheBackend, MemcachedBackend, MemcachedConfig};
use ledger_cache::{CacheAside, CacheStrategy, Error, FetchSource, OperationConfig};
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Helper: Get Memcached server address from environment or use default
fn get_memcached_url() -> String {
    env::var("TEST_MEMCACHED_URL").unwrap_or_else(|_| "localhost:11211".to_string())
}

/// Helper: Unique key per test.
///
/// Alphanumerics and underscores only, to stay inside memcached's key rules.
fn unique_test_key(base: &str) -> String {
    let clean_base = base.replace([':', '-'], "_");
    format!("test_{}_{}", uuid::Uuid::now_v7().simple(), clean_base)
}

/// Helper: Create a test Memcached backend
async fn create_test_backend() -> Result<MemcachedBackend, Box<dyn std::error::Error>> {
    let config = MemcachedConfig {
        servers: vec![get_memcached_url()],
        pool_size: 4,
        ..Default::default()
    };
    let backend = MemcachedBackend::new(config).await?;
    Ok(backend)
}

/// Helper: Check if Memcached is available
async fn is_memcached_available() -> bool {
    match create_test_backend().await {
        Ok(backend) => backend.health_check().await.unwrap_or(false),
        Err(_) => false,
    }
}

macro_rules! require_memcached {
    () => {
        if !is_memcached_available().await {
            println!("⚠️  Memcached not available, skipping test");
            println!("💡 Set TEST_MEMCACHED_URL or start Memcached on localhost:11211");
            return;
        }
    };
}

#[tokio::test]
async fn test_memcached_connection() {
    require_memcached!();

    let backend = create_test_backend()
        .await
        .expect("Failed to create Memcached backend");
    assert!(backend.health_check().await.expect("Health check failed"));
}

#[tokio::test]
async fn test_memcached_basic_set_get_delete() {
    require_memcached!();

    let backend = create_test_backend().await.expect("Failed to connect");
    let key = unique_test_key("basic");

    assert_eq!(backend.get(&key).await.expect("Get failed"), None);

    backend
        .set(&key, b"committed".to_vec(), Some(Duration::from_secs(30)))
        .await
        .expect("Set failed");
    assert_eq!(
        backend.get(&key).await.expect("Get failed"),
        Some(b"committed".to_vec())
    );
    assert!(backend.exists(&key).await.expect("Exists failed"));

    backend.delete(&key).await.expect("Delete failed");
    assert_eq!(backend.get(&key).await.expect("Get failed"), None);
    backend.delete(&key).await.expect("Deleting a missing key failed");
}

#[tokio::test]
async fn test_memcached_mget_with_missing_keys() {
    require_memcached!();

    let backend = create_test_backend().await.expect("Failed to connect");
    let present = unique_test_key("mget_present");
    let absent = unique_test_key("mget_absent");

    backend
        .set(&present, b"1".to_vec(), None)
        .await
        .expect("Set failed");

    let values = backend
        .mget(&[present.as_str(), absent.as_str()])
        .await
        .expect("Mget failed");
    assert_eq!(values, vec![Some(b"1".to_vec()), None]);
}

#[tokio::test]
async fn test_memcached_ttl_expiration() {
    require_memcached!();

    let backend = create_test_backend().await.expect("Failed to connect");
    let key = unique_test_key("ttl");

    backend
        .set(&key, b"short-lived".to_vec(), Some(Duration::from_secs(1)))
        .await
        .expect("Set failed");
    assert!(backend.get(&key).await.expect("Get failed").is_some());

    // Memcached expiry has one-second resolution
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(backend.get(&key).await.expect("Get failed"), None);
}

#[tokio::test]
async fn test_e2e_compute_then_hit() {
    require_memcached!();

    let backend = create_test_backend().await.expect("Failed to connect");
    let cache = CacheAside::new(backend);
    let key = unique_test_key("liquidity");

    let first = cache
        .fetch(
            &key,
            0_i64,
            || async { Ok(Some(250_i64)) },
            CacheStrategy::Refresh,
            OperationConfig::default(),
        )
        .await
        .expect("First fetch failed");
    assert_eq!(first.source, FetchSource::Computed);

    let second = cache
        .fetch(
            &key,
            0_i64,
            || async { Ok(Some(999_i64)) },
            CacheStrategy::Refresh,
            OperationConfig::default(),
        )
        .await
        .expect("Second fetch failed");
    assert_eq!(second.value, 250);
    assert_eq!(second.source, FetchSource::Hit);
}

#[tokio::test]
async fn test_e2e_concurrent_misses_share_one_producer() {
    require_memcached!();

    let backend = create_test_backend().await.expect("Failed to connect");
    let cache = Arc::new(CacheAside::new(backend));
    let key = unique_test_key("block_count");
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute(&key, 0_i64, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Some(64_i64))
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.expect("Task panicked"), Ok(64));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_e2e_missing_value_cached_as_zero() {
    require_memcached!();

    let backend = create_test_backend().await.expect("Failed to connect");
    let cache = CacheAside::new(backend);
    let key = unique_test_key("unknown_symbol");

    let first = cache
        .get_or_compute(&key, 0.0_f64, || async { Ok(None) })
        .await;
    assert_eq!(first, Ok(0.0));

    let cached = cache.lookup::<f64>(&key).await;
    assert_eq!(cached, Ok(Some(0.0)));
}

#[tokio::test]
async fn test_e2e_errors_not_cached() {
    require_memcached!();

    let backend = create_test_backend().await.expect("Failed to connect");
    let cache = CacheAside::new(backend);
    let key = unique_test_key("failing");

    let result = cache
        .get_or_compute(&key, 0_i64, || async {
            Err(Error::TransportError("upstream down".to_string()))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(cache.lookup::<i64>(&key).await, Ok(None));
}
