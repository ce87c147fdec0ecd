//! High-level cache service shared by the typed accessors.
//!
//! Provides a convenient wrapper around CacheAside with Arc for easy sharing.

use crate::aside::{CacheAside, Fetched, OperationConfig};
use crate::backend::CacheBackend;
use crate::error::Result;
use crate::observability::CacheMetrics;
use crate::strategy::CacheStrategy;
use crate::value::CacheValue;
use std::future::Future;
use std::sync::Arc;

/// High-level cache service for request handlers and accessors.
///
/// Wraps `CacheAside` in `Arc` for easy sharing across tasks without
/// requiring external `Arc<Mutex<>>` wrappers.
///
/// # Design
///
/// `CacheBackend` implementations use interior mutability and `CacheAside`
/// only takes `&self`, so the engine can be wrapped in `Arc` without a `Mutex`.
/// Every clone shares one store and one single-flight group, which is what
/// lets concurrent requests for the same key collapse into one producer call.
///
/// # Example
///
/// ```
/// use ledger_cache::{CacheService, backend::InMemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ledger_cache::Result<()> {
/// let cache = CacheService::new(InMemoryBackend::new());
/// let handle = cache.clone(); // cheap - just Arc increment
///
/// let price = handle
///     .get_or_compute("BTC", 0.0_f64, || async { Ok(Some(42000.5)) })
///     .await?;
/// assert_eq!(price, 42000.5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheService<B: CacheBackend> {
    aside: Arc<CacheAside<B>>,
}

impl<B: CacheBackend> CacheService<B> {
    /// Create a new cache service with the given backend.
    pub fn new(backend: B) -> Self {
        Self::from_aside(CacheAside::new(backend))
    }

    /// Create a new cache service with custom metrics.
    pub fn with_metrics(backend: B, metrics: Arc<dyn CacheMetrics>) -> Self {
        Self::from_aside(CacheAside::new(backend).with_metrics(metrics))
    }

    /// Wrap a fully configured engine (TTL policy, store failure policy, ...).
    pub fn from_aside(aside: CacheAside<B>) -> Self {
        CacheService {
            aside: Arc::new(aside),
        }
    }

    /// Get the value for `key`, computing and storing it on a miss.
    ///
    /// See [`CacheAside::get_or_compute`].
    ///
    /// # Errors
    ///
    /// Same error cases as `CacheAside::get_or_compute`.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        zero_value: T,
        producer: F,
    ) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        self.aside.get_or_compute(key, zero_value, producer).await
    }

    /// Execute a cache operation with a strategy and per-operation configuration.
    ///
    /// # Errors
    ///
    /// Same error cases as `CacheAside::fetch`.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        zero_value: T,
        producer: F,
        strategy: CacheStrategy,
        config: OperationConfig,
    ) -> Result<Fetched<T>>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        self.aside
            .fetch(key, zero_value, producer, strategy, config)
            .await
    }

    /// Read `key` without computing anything.
    ///
    /// # Errors
    ///
    /// Same error cases as `CacheAside::lookup`.
    pub async fn lookup<T: CacheValue>(&self, key: &str) -> Result<Option<T>> {
        self.aside.lookup(key).await
    }

    /// Remove `key` from the store.
    ///
    /// # Errors
    ///
    /// Returns `Error::StoreUnavailable` if the store cannot be reached.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.aside.invalidate(key).await
    }

    /// Get a reference to the underlying engine.
    pub fn aside(&self) -> &CacheAside<B> {
        &self.aside
    }
}
