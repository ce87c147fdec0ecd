//! Cache-aside engine - the get-or-compute entry point for every read path.

use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use crate::flight::SingleFlightGroup;
use crate::key::CacheKeyBuilder;
use crate::observability::{CacheMetrics, NoOpMetrics, TtlPolicy};
use crate::strategy::{CacheStrategy, MissingPolicy, StoreFailurePolicy};
use crate::value::CacheValue;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Per-operation overrides.
///
/// Setup-time behavior (metrics, TTL policy, store failure policy) lives on
/// [`CacheAside`]; `OperationConfig` adjusts a single call.
///
/// # Example
///
/// ```
/// use ledger_cache::OperationConfig;
/// use ledger_cache::strategy::MissingPolicy;
/// use std::time::Duration;
///
/// let config = OperationConfig::default()
///     .with_ttl(Duration::from_secs(30))
///     .with_missing(MissingPolicy::Fail)
///     .with_timeout(Duration::from_secs(2));
/// assert_eq!(config.ttl_override, Some(Duration::from_secs(30)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct OperationConfig {
    /// TTL for a value stored by this operation. Takes precedence over the
    /// engine's `TtlPolicy`; `None` falls back to it.
    pub ttl_override: Option<Duration>,

    /// What to do when the producer finds nothing.
    ///
    /// When several callers share one producer call, the policy of the caller
    /// that started it applies to all of them.
    pub missing: MissingPolicy,

    /// How long this caller waits for the producer before giving up.
    pub timeout: Option<Duration>,

    /// Token that lets this caller stop waiting early.
    pub cancel: Option<CancellationToken>,
}

impl OperationConfig {
    /// Override TTL for this operation.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    /// Set the not-found policy for this operation.
    pub fn with_missing(mut self, missing: MissingPolicy) -> Self {
        self.missing = missing;
        self
    }

    /// Give up waiting after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Give up waiting when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Where a returned value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchSource {
    /// Decoded from the store.
    Hit,
    /// This caller ran the producer and stored the result.
    Computed,
    /// This caller received the result of another caller's producer run.
    Shared,
    /// The producer found nothing; the value is the zero value.
    NotFound,
    /// Computed without the store (store unavailable, degraded mode).
    Direct,
    /// `CacheStrategy::Fresh` lookup missed; the value is the zero value.
    Miss,
}

/// A value together with its [`FetchSource`].
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: FetchSource,
}

impl<T> Fetched<T> {
    fn new(value: T, source: FetchSource) -> Self {
        Fetched { value, source }
    }

    /// Whether the value is real data rather than a zero value standing in
    /// for "not found" or "not cached".
    pub fn is_found(&self) -> bool {
        !matches!(self.source, FetchSource::NotFound | FetchSource::Miss)
    }
}

/// Outcome of one producer run, shared by every waiter of the key.
///
/// Carries encoded bytes so each waiter decodes into its own expected type.
#[derive(Clone)]
struct Fill {
    bytes: Vec<u8>,
    found: bool,
}

/// Core cache-aside engine.
///
/// Looks values up in the store; on a miss runs the caller's producer once per
/// key (through a [`SingleFlightGroup`]), stores the result with a TTL and
/// hands it to every waiting caller.
///
/// The store, metrics and TTL policy are constructor-supplied; nothing is global.
///
/// # Example
///
/// ```
/// use ledger_cache::{CacheAside, backend::InMemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ledger_cache::Result<()> {
/// let cache = CacheAside::new(InMemoryBackend::new());
///
/// let count: i64 = cache
///     .get_or_compute("cache::block:executed_count", 0, || async { Ok(Some(17)) })
///     .await?;
/// assert_eq!(count, 17);
/// # Ok(())
/// # }
/// ```
pub struct CacheAside<B: CacheBackend> {
    backend: B,
    flights: SingleFlightGroup<Fill>,
    metrics: Arc<dyn CacheMetrics>,
    pub(crate) ttl_policy: TtlPolicy,
    store_failure: StoreFailurePolicy,
}

impl<B: CacheBackend> CacheAside<B> {
    /// Create new engine over the given store.
    pub fn new(backend: B) -> Self {
        CacheAside {
            backend,
            flights: SingleFlightGroup::new(),
            metrics: Arc::new(NoOpMetrics),
            ttl_policy: TtlPolicy::default(),
            store_failure: StoreFailurePolicy::default(),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set custom TTL policy.
    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    /// Choose what happens when the store cannot be reached.
    pub fn with_store_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.store_failure = policy;
        self
    }

    /// Get the value for `key`, computing and storing it on a miss.
    ///
    /// `zero_value` is returned (and cached) when the producer reports
    /// `Ok(None)`; see [`MissingPolicy::CacheZero`].
    ///
    /// # Errors
    ///
    /// - `Error::StoreUnavailable`: the store failed and the policy is `Propagate`
    /// - `Error::SchemaMismatch`: the cached entry holds another type
    /// - `Error::InvalidCacheEntry` / `Error::DeserializationError`: the cached
    ///   bytes are not a valid envelope of `T`
    /// - any error returned by the producer (never cached)
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
        self.fetch(
            key,
            zero_value,
            producer,
            CacheStrategy::Refresh,
            OperationConfig::default(),
        )
        .await
        .map(|fetched| fetched.value)
    }

    /// Strategy- and config-aware variant of [`get_or_compute`](Self::get_or_compute)
    /// that also reports where the value came from.
    ///
    /// # Errors
    ///
    /// Same as `get_or_compute`, plus `Error::Timeout` / `Error::Cancelled`
    /// when this caller stops waiting, and `Error::NotFound` with
    /// `MissingPolicy::Fail`.
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
        let timer = Instant::now();
        debug!("» Cache operation for key: {} (strategy: {})", key, strategy);

        let result = match strategy {
            CacheStrategy::Fresh => match self.read::<T>(key).await {
                Ok(Some(value)) => Ok(Fetched::new(value, FetchSource::Hit)),
                Ok(None) => Ok(Fetched::new(zero_value, FetchSource::Miss)),
                Err(e) => Err(e),
            },
            CacheStrategy::Refresh => match self.read::<T>(key).await {
                Ok(Some(value)) => Ok(Fetched::new(value, FetchSource::Hit)),
                Ok(None) => {
                    self.produce(key, zero_value, producer, &config, true)
                        .await
                }
                Err(e) => self.on_store_failure(key, e, zero_value, producer, &config).await,
            },
            CacheStrategy::Invalidate => match self.invalidate(key).await {
                Ok(()) => {
                    self.produce(key, zero_value, producer, &config, true)
                        .await
                }
                Err(e) => self.on_store_failure(key, e, zero_value, producer, &config).await,
            },
            CacheStrategy::Bypass => {
                self.produce(key, zero_value, producer, &config, true)
                    .await
            }
        };

        match &result {
            Ok(fetched) => {
                if fetched.source == FetchSource::Hit {
                    self.metrics.record_hit(key, timer.elapsed());
                }
                debug!(
                    "✓ Cache operation for {} -> {:?} in {:?}",
                    key,
                    fetched.source,
                    timer.elapsed()
                );
            }
            Err(e) => self.metrics.record_error(key, &e.to_string()),
        }

        result
    }

    /// Read and decode `key` from the store without computing anything.
    ///
    /// Entries written under another schema version are evicted and reported
    /// as a miss.
    ///
    /// # Errors
    ///
    /// `Error::StoreUnavailable` and the decode errors of `get_or_compute`.
    pub async fn lookup<T: CacheValue>(&self, key: &str) -> Result<Option<T>> {
        self.read(key).await
    }

    /// Remove `key` from the store (e.g. after a write changed the source data).
    ///
    /// # Errors
    ///
    /// Returns `Error::StoreUnavailable` if the store cannot be reached.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let started = Instant::now();
        self.backend.delete(key).await?;
        self.metrics.record_delete(key, started.elapsed());
        debug!("✓ Cache invalidated for {}", key);
        Ok(())
    }

    /// Number of producer calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn read<T: CacheValue>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };

        match T::deserialize_from_cache(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(Error::VersionMismatch { expected, found }) => {
                warn!(
                    "Evicting {} written with schema version {} (current {})",
                    key, found, expected
                );
                self.backend.delete(key).await?;
                Ok(None)
            }
            Err(e) if e.is_schema_error() => {
                error!(
                    "Cached value for {} does not decode as {}: {} (key collision or corrupted entry)",
                    key,
                    T::type_tag(),
                    e
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn on_store_failure<T, F, Fut>(
        &self,
        key: &str,
        error: Error,
        zero_value: T,
        producer: F,
        config: &OperationConfig,
    ) -> Result<Fetched<T>>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        match (&error, self.store_failure) {
            (Error::StoreUnavailable(cause), StoreFailurePolicy::ComputeDirect) => {
                self.metrics.record_degraded(key, cause);
                warn!(
                    "Store unavailable for {}, computing without cache: {}",
                    key, cause
                );
                self.produce(key, zero_value, producer, config, false)
                    .await
                    .map(|fetched| {
                        let source = if fetched.source == FetchSource::NotFound {
                            FetchSource::NotFound
                        } else {
                            FetchSource::Direct
                        };
                        Fetched::new(fetched.value, source)
                    })
            }
            _ => Err(error),
        }
    }

    /// Run the producer through the single-flight group. With `persist`, the
    /// leader stores the outcome before any waiter is released.
    async fn produce<T, F, Fut>(
        &self,
        key: &str,
        zero_value: T,
        producer: F,
        config: &OperationConfig,
        persist: bool,
    ) -> Result<Fetched<T>>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let timer = Instant::now();
        let backend = self.backend.clone();
        let metrics = Arc::clone(&self.metrics);
        let ttl = config
            .ttl_override
            .or_else(|| self.ttl_policy.get_ttl(CacheKeyBuilder::namespace_of(key)));
        let missing = config.missing;
        let owned_key = key.to_string();

        let adapter = move || {
            let pending = producer();
            async move {
                let (bytes, found) = match pending.await? {
                    Some(value) => (value.serialize_for_cache()?, true),
                    None => match missing {
                        MissingPolicy::Fail => return Err(Error::NotFound(owned_key)),
                        MissingPolicy::ZeroUncached => {
                            return Ok(Fill {
                                bytes: zero_value.serialize_for_cache()?,
                                found: false,
                            })
                        }
                        MissingPolicy::CacheZero => (zero_value.serialize_for_cache()?, false),
                    },
                };

                if persist {
                    let started = Instant::now();
                    match backend.set(&owned_key, bytes.clone(), ttl).await {
                        Ok(()) => metrics.record_set(&owned_key, started.elapsed()),
                        Err(e) => {
                            // The value is still good; only the cache stays cold.
                            warn!("Failed to store {} after produce: {}", owned_key, e);
                            metrics.record_error(&owned_key, &e.to_string());
                        }
                    }
                }

                Ok(Fill { bytes, found })
            }
        };

        let (outcome, shared) = self
            .flights
            .work_until(key, adapter, config.cancel.as_ref(), config.timeout)
            .await;

        if shared {
            self.metrics.record_shared(key);
        } else {
            self.metrics.record_miss(key, timer.elapsed());
        }

        let fill = outcome?;
        let value = T::deserialize_from_cache(&fill.bytes)?;
        let source = match (fill.found, shared) {
            (false, _) => FetchSource::NotFound,
            (true, true) => FetchSource::Shared,
            (true, false) => FetchSource::Computed,
        };

        Ok(Fetched::new(value, source))
    }
}
