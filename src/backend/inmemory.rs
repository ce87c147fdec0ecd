//! In-memory value store (default, thread-safe, async).
//!
//! An unbounded store uses DashMap for concurrent access with per-key
//! sharding. A bounded store keeps its entries in an `LruCache` behind a
//! mutex and evicts the least-recently-used entry when it grows past
//! capacity. Expired entries are dropped on access.
//!
//! Expiry is measured with `tokio::time::Instant`, so tests can pause and
//! advance the clock instead of sleeping.

use super::{effective_ttl, CacheBackend, DEFAULT_TTL};
use crate::error::Result;
use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// In-memory cache entry. Replaced on every `set`, never mutated.
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        CacheEntry {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

#[derive(Clone)]
enum Entries {
    Unbounded(Arc<DashMap<String, CacheEntry>>),
    Bounded(Arc<Mutex<LruCache<String, CacheEntry>>>),
}

/// Thread-safe async in-memory value store.
///
/// Clones share the same underlying entries.
///
/// # Example
///
/// ```no_run
/// use ledger_cache::backend::{InMemoryBackend, CacheBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::with_capacity(10_000)
///         .with_default_ttl(Duration::from_secs(30));
///
///     // Stored with the 30s default TTL
///     backend.set("cache::block:executed_count", b"...".to_vec(), None).await?;
///
///     // Stored with an explicit TTL
///     backend.set("BTC", b"...".to_vec(), Some(Duration::from_secs(10))).await?;
///
///     assert!(backend.get("BTC").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    entries: Entries,
    evictions: Arc<AtomicU64>,
    default_ttl: Duration,
}

impl InMemoryBackend {
    /// Create a new unbounded in-memory store with the crate default TTL.
    pub fn new() -> Self {
        InMemoryBackend {
            entries: Entries::Unbounded(Arc::new(DashMap::new())),
            evictions: Arc::new(AtomicU64::new(0)),
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Create a store holding at most `capacity` entries (LRU eviction).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        InMemoryBackend {
            entries: Entries::Bounded(Arc::new(Mutex::new(LruCache::new(capacity)))),
            ..Self::new()
        }
    }

    /// Set the TTL used when `set` is called without one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.default_ttl = ttl;
        }
        self
    }

    /// TTL applied to entries stored without an explicit TTL.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get the current number of entries (expired ones included until touched).
    pub async fn len(&self) -> usize {
        match &self.entries {
            Entries::Unbounded(map) => map.len(),
            Entries::Bounded(lru) => lru.lock().await.len(),
        }
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get memory statistics.
    pub async fn stats(&self) -> CacheStats {
        let (total_entries, expired_entries, total_bytes) = match &self.entries {
            Entries::Unbounded(map) => (
                map.len(),
                map.iter().filter(|entry| entry.is_expired()).count(),
                map.iter().map(|entry| entry.data.len()).sum(),
            ),
            Entries::Bounded(lru) => {
                let lru = lru.lock().await;
                (
                    lru.len(),
                    lru.iter().filter(|(_, entry)| entry.is_expired()).count(),
                    lru.iter().map(|(_, entry)| entry.data.len()).sum(),
                )
            }
        };

        CacheStats {
            total_entries,
            expired_entries,
            total_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Print store statistics to debug log.
    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        debug!(
            "Cache Stats: {} entries ({} expired), {} bytes, {} evictions",
            stats.total_entries, stats.expired_entries, stats.total_bytes, stats.evictions
        );
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Live value for `key`, bumping its recency. An expired entry is dropped.
fn lru_get(lru: &mut LruCache<String, CacheEntry>, key: &str) -> Option<Vec<u8>> {
    let expired = match lru.get(key) {
        Some(entry) if !entry.is_expired() => return Some(entry.data.clone()),
        Some(_) => true,
        None => false,
    };
    if expired {
        lru.pop(key);
    }
    None
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = match &self.entries {
            Entries::Unbounded(map) => {
                let live = map
                    .get(key)
                    .filter(|entry| !entry.is_expired())
                    .map(|entry| entry.data.clone());
                if live.is_none() {
                    // Only drop the entry if it is still the expired one; a
                    // concurrent `set` may already have replaced it.
                    map.remove_if(key, |_, entry| entry.is_expired());
                }
                live
            }
            Entries::Bounded(lru) => lru_get(&mut *lru.lock().await, key),
        };

        if value.is_some() {
            debug!("✓ InMemory GET {} -> HIT", key);
        } else {
            debug!("✓ InMemory GET {} -> MISS", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let ttl = effective_ttl(ttl, self.default_ttl);
        let entry = CacheEntry::new(value, ttl);

        match &self.entries {
            Entries::Unbounded(map) => {
                map.insert(key.to_string(), entry);
            }
            Entries::Bounded(lru) => {
                // `push` hands back the displaced entry: the old value for
                // `key`, or the least recently used one when full.
                let displaced = lru.lock().await.push(key.to_string(), entry);
                if let Some((evicted, _)) = displaced.filter(|(evicted, _)| evicted != key) {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!("✓ InMemory EVICT {}", evicted);
                }
            }
        }

        debug!("✓ InMemory SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match &self.entries {
            Entries::Unbounded(map) => {
                map.remove(key);
            }
            Entries::Bounded(lru) => {
                lru.lock().await.pop(key);
            }
        }
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let live = match &self.entries {
            Entries::Unbounded(map) => map.get(key).is_some_and(|entry| !entry.is_expired()),
            Entries::Bounded(lru) => lru
                .lock()
                .await
                .peek(key)
                .is_some_and(|entry| !entry.is_expired()),
        };
        Ok(live)
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let results: Vec<Option<Vec<u8>>> = match &self.entries {
            Entries::Unbounded(map) => keys
                .iter()
                .map(|k| {
                    map.get(*k)
                        .filter(|entry| !entry.is_expired())
                        .map(|entry| entry.data.clone())
                })
                .collect(),
            Entries::Bounded(lru) => {
                let mut lru = lru.lock().await;
                keys.iter().map(|k| lru_get(&mut lru, k)).collect()
            }
        };

        debug!("✓ InMemory MGET {} keys", keys.len());
        Ok(results)
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        match &self.entries {
            Entries::Unbounded(map) => {
                for key in keys {
                    map.remove(*key);
                }
            }
            Entries::Bounded(lru) => {
                let mut lru = lru.lock().await;
                for key in keys {
                    lru.pop(*key);
                }
            }
        }

        debug!("✓ InMemory MDELETE {} keys", keys.len());
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn clear_all(&self) -> Result<()> {
        match &self.entries {
            Entries::Unbounded(map) => map.clear(),
            Entries::Bounded(lru) => lru.lock().await.clear(),
        }
        warn!("⚠ InMemory CLEAR_ALL executed - all cache cleared!");
        Ok(())
    }
}

/// Cache statistics.
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_backend_set_get() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");

        let result = backend.get("key1").await.expect("Failed to get");
        assert_eq!(result, Some(b"value1".to_vec()));
    }

    #[tokio::test]
    async fn test_inmemory_backend_miss() {
        let backend = InMemoryBackend::new();

        let result = backend.get("nonexistent").await.expect("Failed to get");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_inmemory_backend_overwrite() {
        let backend = InMemoryBackend::new();

        backend.set("count", b"17".to_vec(), None).await.unwrap();
        backend.set("count", b"18".to_vec(), None).await.unwrap();

        assert_eq!(backend.get("count").await.unwrap(), Some(b"18".to_vec()));
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_inmemory_backend_delete() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");
        assert!(backend
            .exists("key1")
            .await
            .expect("Failed to check exists"));

        backend.delete("key1").await.expect("Failed to delete");
        assert!(!backend
            .exists("key1")
            .await
            .expect("Failed to check exists"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inmemory_backend_ttl_expiration() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), Some(Duration::from_millis(100)))
            .await
            .expect("Failed to set");

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(backend.get("key1").await.expect("Failed to get").is_some());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(backend.get("key1").await.expect("Failed to get").is_none());
        assert!(backend.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inmemory_backend_zero_ttl_uses_default() {
        let backend = InMemoryBackend::new().with_default_ttl(Duration::from_secs(5));

        backend
            .set("key1", b"value1".to_vec(), Some(Duration::ZERO))
            .await
            .expect("Failed to set");

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(backend.get("key1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backend.get("key1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inmemory_backend_no_ttl_still_expires() {
        let backend = InMemoryBackend::new();

        backend.set("key1", b"v".to_vec(), None).await.unwrap();

        tokio::time::advance(DEFAULT_TTL + Duration::from_millis(1)).await;
        assert!(backend.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inmemory_backend_lru_eviction() {
        let backend = InMemoryBackend::with_capacity(2);

        backend.set("a", b"1".to_vec(), None).await.unwrap();
        backend.set("b", b"2".to_vec(), None).await.unwrap();

        // Touch "a" so "b" becomes least recently used
        assert!(backend.get("a").await.unwrap().is_some());

        backend.set("c", b"3".to_vec(), None).await.unwrap();

        assert_eq!(backend.len().await, 2);
        assert!(backend.get("a").await.unwrap().is_some());
        assert!(backend.get("b").await.unwrap().is_none());
        assert!(backend.get("c").await.unwrap().is_some());
        assert_eq!(backend.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_inmemory_backend_set_refreshes_recency() {
        let backend = InMemoryBackend::with_capacity(2);

        backend.set("a", b"1".to_vec(), None).await.unwrap();
        backend.set("b", b"2".to_vec(), None).await.unwrap();

        // Rewriting "a" makes "b" the least recently used, and is not an eviction
        backend.set("a", b"3".to_vec(), None).await.unwrap();
        assert_eq!(backend.stats().await.evictions, 0);

        backend.set("c", b"4".to_vec(), None).await.unwrap();

        assert_eq!(backend.get("a").await.unwrap(), Some(b"3".to_vec()));
        assert!(backend.get("b").await.unwrap().is_none());
        assert_eq!(backend.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_inmemory_backend_exists_does_not_refresh_recency() {
        let backend = InMemoryBackend::with_capacity(2);

        backend.set("a", b"1".to_vec(), None).await.unwrap();
        backend.set("b", b"2".to_vec(), None).await.unwrap();
        assert!(backend.exists("a").await.unwrap());

        backend.set("c", b"3".to_vec(), None).await.unwrap();

        assert!(!backend.exists("a").await.unwrap());
        assert!(backend.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_inmemory_backend_zero_capacity_holds_one() {
        let backend = InMemoryBackend::with_capacity(0);

        backend.set("a", b"1".to_vec(), None).await.unwrap();
        backend.set("b", b"2".to_vec(), None).await.unwrap();

        assert_eq!(backend.len().await, 1);
        assert!(backend.get("b").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inmemory_backend_bounded_drops_expired_on_access() {
        let backend = InMemoryBackend::with_capacity(8);

        backend
            .set("short", b"1".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        backend.set("long", b"2".to_vec(), None).await.unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(backend.stats().await.expired_entries, 1);

        let values = backend.mget(&["short", "long"]).await.unwrap();
        assert_eq!(values, vec![None, Some(b"2".to_vec())]);
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.stats().await.evictions, 0);
    }

    #[tokio::test]
    async fn test_inmemory_backend_bounded_eviction_at_scale() {
        let backend = InMemoryBackend::with_capacity(1_000);

        for i in 0..10_000 {
            backend
                .set(&format!("block:{}", i), i.to_string().into_bytes(), None)
                .await
                .unwrap();
        }

        assert_eq!(backend.len().await, 1_000);
        assert_eq!(backend.stats().await.evictions, 9_000);
        assert!(backend.get("block:8999").await.unwrap().is_none());
        assert!(backend.get("block:9000").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_inmemory_backend_mget() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");
        backend
            .set("key2", b"value2".to_vec(), None)
            .await
            .expect("Failed to set");

        let results = backend
            .mget(&["key1", "key2", "key3"])
            .await
            .expect("Failed to mget");

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Some(b"value1".to_vec()));
        assert_eq!(results[1], Some(b"value2".to_vec()));
        assert_eq!(results[2], None);
    }

    #[tokio::test]
    async fn test_inmemory_backend_mdelete() {
        let backend = InMemoryBackend::new();

        for key in ["key1", "key2", "key3"] {
            backend
                .set(key, b"value".to_vec(), None)
                .await
                .expect("Failed to set");
        }

        assert_eq!(backend.len().await, 3);

        backend
            .mdelete(&["key1", "key2"])
            .await
            .expect("Failed to mdelete");

        assert_eq!(backend.len().await, 1);
        assert!(backend.get("key3").await.expect("Failed to get").is_some());
    }

    #[tokio::test]
    async fn test_inmemory_backend_clear_all() {
        let backend = InMemoryBackend::new();

        backend.set("key1", b"value1".to_vec(), None).await.unwrap();
        backend.set("key2", b"value2".to_vec(), None).await.unwrap();

        assert_eq!(backend.len().await, 2);

        backend.clear_all().await.expect("Failed to clear");

        assert_eq!(backend.len().await, 0);
    }

    #[tokio::test]
    async fn test_inmemory_backend_stats() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value_with_data".to_vec(), None)
            .await
            .expect("Failed to set");
        backend
            .set("key2", b"data".to_vec(), None)
            .await
            .expect("Failed to set");

        let stats = backend.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 0);
        assert_eq!(stats.total_bytes, 19);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn test_inmemory_backend_clone_shares_store() {
        let backend1 = InMemoryBackend::new();
        backend1
            .set("key", b"value".to_vec(), None)
            .await
            .expect("Failed to set");

        let backend2 = backend1.clone();
        assert_eq!(
            backend2.get("key").await.unwrap(),
            Some(b"value".to_vec())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_inmemory_backend_thread_safe() {
        let backend = InMemoryBackend::new();
        let mut handles = vec![];

        for i in 0..10 {
            let b = backend.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("key_{}", i);
                let value = format!("value_{}", i);
                b.set(&key, value.into_bytes(), None)
                    .await
                    .expect("Failed to set");
            }));
        }

        for handle in handles {
            handle.await.expect("Task failed");
        }

        assert_eq!(backend.len().await, 10);
    }
}
