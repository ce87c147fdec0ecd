//! Memcached value store.

use super::{effective_ttl, CacheBackend, DEFAULT_TTL};
use crate::error::{Error, Result};
use async_memcached::AsciiProtocol;
use deadpool_memcached::{Manager, Pool};
use std::time::Duration;

/// Default Memcached connection pool size.
/// Formula: (CPU cores × 2) + 1
/// Override with MEMCACHED_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Configuration for Memcached backend.
#[derive(Clone, Debug)]
pub struct MemcachedConfig {
    pub servers: Vec<String>, // e.g., ["localhost:11211", "cache2:11211"]
    pub connection_timeout: Duration,
    pub pool_size: u32,
    /// TTL for writes that do not pick one.
    pub default_ttl: Duration,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: vec!["localhost:11211".to_string()],
            connection_timeout: Duration::from_secs(5),
            pool_size: DEFAULT_POOL_SIZE,
            default_ttl: DEFAULT_TTL,
        }
    }
}

/// Shared value store backed by Memcached.
///
/// Memcached may evict entries before their TTL under memory pressure; for the
/// cache-aside contract that is just an early miss.
///
/// # Example
///
/// ```no_run
/// # use ledger_cache::backend::{MemcachedBackend, MemcachedConfig, CacheBackend};
/// # use ledger_cache::error::Result;
/// # async fn example() -> Result<()> {
/// let config = MemcachedConfig {
///     servers: vec!["localhost:11211".to_string()],
///     ..Default::default()
/// };
///
/// let backend = MemcachedBackend::new(config).await?;
/// backend.set("cache::block:executed_count", b"bytes".to_vec(), None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemcachedBackend {
    pool: Pool,
    default_ttl: Duration,
}

impl MemcachedBackend {
    /// Create new Memcached backend from configuration.
    ///
    /// deadpool-memcached manages a single server, so only the first entry of
    /// `servers` is used.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if no server is given or the pool cannot be built.
    pub async fn new(config: MemcachedConfig) -> Result<Self> {
        let addr = config
            .servers
            .first()
            .ok_or_else(|| Error::ConfigError("No memcached servers specified".to_string()))?
            .clone();

        let manager = Manager::new(addr.clone());

        let pool = Pool::builder(manager)
            .max_size(config.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Memcached backend initialized with server: {} (pool size: {}, default TTL: {:?})",
            addr, config.pool_size, config.default_ttl
        );

        Ok(MemcachedBackend {
            pool,
            default_ttl: config.default_ttl,
        })
    }

    /// Create from server address directly.
    ///
    /// Pool size is determined by:
    /// 1. `MEMCACHED_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the pool cannot be built.
    pub async fn from_server(addr: String) -> Result<Self> {
        let pool_size = std::env::var("MEMCACHED_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let config = MemcachedConfig {
            servers: vec![addr],
            pool_size,
            ..Default::default()
        };
        Self::new(config).await
    }
}

/// Longest key the memcached text protocol accepts.
const MAX_KEY_LEN: usize = 250;

fn pool_error(e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("Failed to get Memcached connection: {}", e))
}

fn command_error(command: &str, key: &str, e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("Memcached {} failed for {}: {}", command, key, e))
}

/// The server answers NOT_FOUND for deletes of absent keys and for multi-gets
/// that match nothing.
fn is_not_found(e: &impl std::fmt::Display) -> bool {
    e.to_string().to_ascii_lowercase().contains("not found")
}

/// Keys reach the wire verbatim, so whitespace or control bytes would split
/// the command line.
fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::ValidationError(format!(
            "memcached keys must be 1..={} bytes, got {}",
            MAX_KEY_LEN,
            key.len()
        )));
    }
    if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(Error::ValidationError(format!(
            "memcached key {:?} contains whitespace or control characters",
            key
        )));
    }
    Ok(())
}

/// Longest expiration memcached treats as relative. Larger values are read
/// as an absolute unix timestamp.
const MAX_RELATIVE_EXPIRATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Memcached reads an expiration of 0 as "never"; whole seconds, at least one,
/// at most thirty days.
fn expiration_secs(ttl: Duration) -> i64 {
    let secs = ttl.as_secs().clamp(1, MAX_RELATIVE_EXPIRATION_SECS);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

impl CacheBackend for MemcachedBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let value = conn
            .get(key)
            .await
            .map_err(|e| command_error("GET", key, e))?
            .and_then(|value| value.data);

        debug!(
            "✓ Memcached GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        check_key(key)?;
        let ttl = effective_ttl(ttl, self.default_ttl);
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        conn.set(key, value.as_slice(), Some(expiration_secs(ttl)), None)
            .await
            .map_err(|e| command_error("SET", key, e))?;

        debug!("✓ Memcached SET {} ({} bytes, TTL: {:?})", key, value.len(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        match conn.delete(key).await {
            Ok(()) => debug!("✓ Memcached DELETE {}", key),
            Err(e) if is_not_found(&e) => debug!("✓ Memcached DELETE {} (absent)", key),
            Err(e) => return Err(command_error("DELETE", key, e)),
        }
        Ok(())
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in keys {
            check_key(key)?;
        }

        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let values = match conn.get_multi(keys).await {
            Ok(values) => values,
            Err(e) if is_not_found(&e) => {
                debug!("✓ Memcached MGET {} keys (all miss)", keys.len());
                return Ok(vec![None; keys.len()]);
            }
            Err(e) => return Err(command_error("MGET", &keys.join(","), e)),
        };

        let mut found: std::collections::HashMap<Vec<u8>, Vec<u8>> = values
            .into_iter()
            .filter_map(|value| value.data.map(|data| (value.key, data)))
            .collect();

        debug!("✓ Memcached MGET {} keys, {} hit", keys.len(), found.len());
        Ok(keys
            .iter()
            .map(|key| found.remove(key.as_bytes()))
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => Ok(conn.get("__health_check__").await.is_ok()),
            Err(e) => {
                warn!("Memcached health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        conn.flush_all()
            .await
            .map_err(|e| command_error("FLUSH_ALL", "*", e))?;

        warn!("⚠ Memcached FLUSH_ALL executed - all cache cleared!");
        Ok(())
    }
}
