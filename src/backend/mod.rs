//! Value store implementations.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::{CacheStats, InMemoryBackend};
#[cfg(feature = "memcached")]
pub use memcached::{MemcachedBackend, MemcachedConfig};
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Default TTL applied when a caller passes no TTL (or a zero TTL).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Resolve a caller-supplied TTL against a store default.
///
/// `None` and zero both mean "use the default": a store never keeps a value
/// forever because a caller forgot to pick a TTL.
pub fn effective_ttl(ttl: Option<Duration>, default_ttl: Duration) -> Duration {
    match ttl {
        Some(d) if !d.is_zero() => d,
        _ => default_ttl,
    }
}

/// Trait for value store implementations.
///
/// Abstracts storage operations, allowing swappable backends: in-process
/// (default), Redis, Memcached, or a read-through relational store.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Backend implementations should use interior mutability or external storage.
///
/// **ASYNC:** All methods return `Send` futures so the single-flight leader can
/// write to the store from a spawned task. Implementations may use `async fn`.
///
/// The store is not responsible for type safety; values are opaque bytes.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Retrieve value from the store by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found and not expired
    /// - `Ok(None)` - Missing or expired key
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the medium cannot be reached.
    /// A miss is never an error.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store value, overwriting unconditionally.
    ///
    /// # Arguments
    /// - `key`: Cache key
    /// - `value`: Serialized envelope bytes
    /// - `ttl`: Time-to-live. `None` or zero = the store's default TTL
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the medium cannot be reached.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove value from the store.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the medium cannot be reached.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if key exists (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Bulk get operation (optional optimization).
    ///
    /// Default implementation calls `get()` for each key.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mget(&self, keys: &[&str]) -> impl Future<Output = Result<Vec<Option<Vec<u8>>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                results.push(self.get(key).await?);
            }
            Ok(results)
        }
    }

    /// Bulk delete operation (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mdelete(&self, keys: &[&str]) -> impl Future<Output = Result<()>> + Send {
        async move {
            for key in keys {
                self.delete(key).await?;
            }
            Ok(())
        }
    }

    /// Health check - verify the store is reachable.
    ///
    /// # Errors
    /// Returns `Err` if the store is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }

    /// Optional: Clear all entries (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if operation is not implemented or fails
    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send {
        async {
            Err(crate::error::Error::NotImplemented(
                "clear_all not implemented for this backend".to_string(),
            ))
        }
    }
}
