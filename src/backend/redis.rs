//! Redis value store.

use super::{effective_ttl, CacheBackend, DEFAULT_TTL};
use crate::error::{Error, Result};
use deadpool_redis::{redis::AsyncCommands, Config as PoolConfig, Connection, Pool, Runtime};
use std::time::Duration;

/// Pool statistics information.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Default Redis connection pool size.
/// Formula: (CPU cores × 2) + 1
/// Override with REDIS_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Configuration for Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: u32,
    /// Upper bound for waiting on (or opening) a pooled connection.
    pub connection_timeout: Duration,
    /// TTL for writes that do not pick one.
    pub default_ttl: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(5),
            default_ttl: DEFAULT_TTL,
        }
    }
}

impl RedisConfig {
    /// Build Redis connection string.
    pub fn connection_string(&self) -> String {
        if let Some(password) = &self.password {
            if let Some(username) = &self.username {
                format!(
                    "redis://{}:{}@{}:{}/{}",
                    username, password, self.host, self.port, self.database
                )
            } else {
                format!(
                    "redis://default:{}@{}:{}/{}",
                    password, self.host, self.port, self.database
                )
            }
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

/// Shared value store backed by Redis, for deployments running several
/// service instances.
///
/// Uses deadpool for async connection pooling. Every write carries an
/// expiry (`SET EX`); connection or command failures surface as
/// `Error::StoreUnavailable`, never as a miss.
///
/// # Example
///
/// ```no_run
/// # use ledger_cache::backend::{RedisBackend, RedisConfig, CacheBackend};
/// # use ledger_cache::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(RedisConfig::default()).await?;
///
/// backend.set("BTC", b"bytes".to_vec(), None).await?;
/// let value = backend.get("BTC").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    default_ttl: Duration,
}

impl RedisBackend {
    /// Create new Redis backend from configuration.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the pool cannot be created.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = build_pool(
            &config.connection_string(),
            config.pool_size,
            Some(config.connection_timeout),
        )?;

        info!(
            "✓ Redis backend initialized: {}:{} (pool size: {}, default TTL: {:?})",
            config.host, config.port, config.pool_size, config.default_ttl
        );

        Ok(RedisBackend {
            pool,
            default_ttl: config.default_ttl,
        })
    }

    /// Create from connection string directly.
    ///
    /// Pool size is determined by:
    /// 1. `REDIS_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the pool cannot be created.
    pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
        let pool_size = std::env::var("REDIS_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let pool = build_pool(conn_str, pool_size, None)?;

        info!(
            "✓ Redis backend initialized from connection string (pool size: {})",
            pool_size
        );

        Ok(RedisBackend {
            pool,
            default_ttl: DEFAULT_TTL,
        })
    }

    /// Set the TTL used for writes that do not pick one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Get current pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
        }
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| {
            Error::StoreUnavailable(format!("Failed to get Redis connection: {}", e))
        })
    }
}

fn build_pool(conn_str: &str, pool_size: u32, timeout: Option<Duration>) -> Result<Pool> {
    let mut pool_config = deadpool_redis::PoolConfig::new(pool_size as usize);
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;

    let mut cfg = PoolConfig::from_url(conn_str);
    cfg.pool = Some(pool_config);

    cfg.create_pool(Some(Runtime::Tokio1))
        .map_err(|e| Error::ConfigError(format!("Failed to create Redis pool: {}", e)))
}

fn command_error(command: &str, target: &str, e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("Redis {} failed for {}: {}", command, target, e))
}

/// `SET EX` rejects 0; whole seconds, at least one.
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;

        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| command_error("GET", key, e))?;

        debug!(
            "✓ Redis GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let seconds = expiry_secs(effective_ttl(ttl, self.default_ttl));
        let size = value.len();
        let mut conn = self.conn().await?;

        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|e| command_error("SET EX", key, e))?;

        debug!("✓ Redis SET {} ({} bytes, TTL: {}s)", key, size, seconds);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;

        conn.del::<_, ()>(key)
            .await
            .map_err(|e| command_error("DEL", key, e))?;

        debug!("✓ Redis DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;

        conn.exists(key)
            .await
            .map_err(|e| command_error("EXISTS", key, e))
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;

        // cmd("MGET") keeps a one-element batch a list reply
        let values: Vec<Option<Vec<u8>>> = deadpool_redis::redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut *conn)
            .await
            .map_err(|e| command_error("MGET", &keys.join(","), e))?;

        debug!(
            "✓ Redis MGET {} keys, {} hit",
            keys.len(),
            values.iter().filter(|v| v.is_some()).count()
        );
        Ok(values)
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;

        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| command_error("DEL", &keys.join(","), e))?;

        debug!("✓ Redis MDELETE {} keys", keys.len());
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = match self.conn().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                return Ok(false);
            }
        };

        let pong: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| command_error("PING", "server", e))?;

        Ok(pong == "PONG")
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn().await?;

        deadpool_redis::redis::cmd("FLUSHDB")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| command_error("FLUSHDB", "database", e))?;

        warn!("⚠ Redis FLUSHDB executed - all cache cleared!");
        Ok(())
    }
}
