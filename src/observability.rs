//! Observability hooks and TTL policies for cache operations.
//!
//! # Metrics
//!
//! Implement [`CacheMetrics`] to feed your monitoring system:
//!
//! ```ignore
//! use ledger_cache::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _key: &str, _duration: Duration) {
//!         // counter!("cache_hits").inc();
//!     }
//!     fn record_shared(&self, _key: &str) {
//!         // counter!("cache_dedup_hits").inc();
//!     }
//! }
//! ```
//!
//! The default is [`NoOpMetrics`]. [`CacheCounters`] keeps in-process counters
//! and is handy for health endpoints and tests.
//!
//! Hooks:
//! - `record_hit()` - value served from the store
//! - `record_miss()` - producer ran (leader) for a missing key
//! - `record_shared()` - caller joined an in-flight producer instead of running one
//! - `record_set()` / `record_delete()` - store writes
//! - `record_degraded()` - store unavailable, value computed without caching
//! - `record_error()` - operation failure
//!
//! # TTL Policies
//!
//! ```
//! use ledger_cache::observability::TtlPolicy;
//! use std::time::Duration;
//!
//! // Fixed TTL for all entries (5 minutes)
//! let _policy = TtlPolicy::Fixed(Duration::from_secs(300));
//!
//! // Different TTL per key namespace
//! let _policy = TtlPolicy::PerNamespace(|namespace| match namespace {
//!     "block" => Duration::from_secs(10),
//!     "liquidity" => Duration::from_secs(5),
//!     _ => Duration::from_secs(60),
//! });
//! ```
//!
//! There is no "infinite" policy. `Default` defers to the store's default TTL.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a store hit.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a miss that ran the producer.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a caller that received a deduplicated result.
    fn record_shared(&self, key: &str) {
        debug!("Cache SHARED: {}", key);
    }

    /// Record a store write.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record a store delete.
    fn record_delete(&self, key: &str, duration: Duration) {
        debug!("Cache DELETE: {} took {:?}", key, duration);
    }

    /// Record a value computed while the store was unavailable.
    fn record_degraded(&self, key: &str, error: &str) {
        warn!("Cache DEGRADED for {}: {}", key, error);
    }

    /// Record an error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_shared(&self, _key: &str) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _key: &str, _duration: Duration) {}
    fn record_degraded(&self, _key: &str, _error: &str) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Lock-free in-process counters.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    shared: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    degraded: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`CacheCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub shared: u64,
    pub sets: u64,
    pub deletes: u64,
    pub degraded: u64,
    pub errors: u64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            shared: self.shared.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl CacheMetrics for CacheCounters {
    fn record_hit(&self, _key: &str, _duration: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, _key: &str, _duration: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_shared(&self, _key: &str) {
        self.shared.fetch_add(1, Ordering::Relaxed);
    }

    fn record_set(&self, _key: &str, _duration: Duration) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self, _key: &str, _duration: Duration) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_degraded(&self, key: &str, error: &str) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        warn!("Cache DEGRADED for {}: {}", key, error);
    }

    fn record_error(&self, key: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        debug!("Cache ERROR for {}: {}", key, error);
    }
}

/// TTL (Time-to-Live) policy for cache entries.
#[derive(Clone, Debug, Default)]
pub enum TtlPolicy {
    /// Use the store's default TTL
    #[default]
    Default,

    /// Fixed duration for all entries
    Fixed(Duration),

    /// Duration chosen by key namespace (`block` for `cache::block:...`)
    PerNamespace(fn(&str) -> Duration),
}

impl TtlPolicy {
    /// Get TTL for a key namespace. `None` means the store default.
    pub fn get_ttl(&self, namespace: &str) -> Option<Duration> {
        match self {
            TtlPolicy::Default => None,
            TtlPolicy::Fixed(d) => Some(*d),
            TtlPolicy::PerNamespace(f) => Some(f(namespace)),
        }
    }
}
