//! Latest liquidity per AMM pair, read by the swap quote path.

use crate::aside::OperationConfig;
use crate::backend::CacheBackend;
use crate::error::Result;
use crate::key::CacheKeyBuilder;
use crate::repository::{LiquidityInfo, LiquidityRepository};
use crate::service::CacheService;
use crate::strategy::{CacheStrategy, MissingPolicy};
use std::sync::Arc;
use std::time::Duration;

/// `cache::liquidity:{pair_index}`
pub fn liquidity_key(pair_index: i64) -> String {
    CacheKeyBuilder::namespaced("liquidity", &[&pair_index])
}

/// Cached liquidity lookups.
///
/// An unknown pair is an error (`Error::NotFound`), never a cached default:
/// quoting a swap against an empty pool would be wrong, not just stale.
pub struct LiquidityAccessor<B: CacheBackend, R: LiquidityRepository> {
    cache: CacheService<B>,
    repository: Arc<R>,
    ttl: Duration,
}

impl<B: CacheBackend, R: LiquidityRepository> LiquidityAccessor<B, R> {
    pub fn new(cache: CacheService<B>, repository: Arc<R>, ttl: Duration) -> Self {
        LiquidityAccessor {
            cache,
            repository,
            ttl,
        }
    }

    /// Latest liquidity of `pair_index`.
    ///
    /// # Errors
    /// - `Error::NotFound`: no such pair (uncached)
    /// - `Error::RepositoryError`: lookup failed (uncached)
    /// - any error of `CacheService::fetch`
    pub async fn latest_liquidity(&self, pair_index: i64) -> Result<LiquidityInfo> {
        let repository = Arc::clone(&self.repository);
        let producer =
            move || async move { repository.latest_liquidity(pair_index).await };

        let config = OperationConfig::default()
            .with_ttl(self.ttl)
            .with_missing(MissingPolicy::Fail);

        self.cache
            .fetch(
                &liquidity_key(pair_index),
                LiquidityInfo::default(),
                producer,
                CacheStrategy::Refresh,
                config,
            )
            .await
            .map(|fetched| fetched.value)
    }

    /// Drop the cached liquidity of `pair_index` after a write to the pair.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the store cannot be reached.
    pub async fn invalidate(&self, pair_index: i64) -> Result<()> {
        self.cache.invalidate(&liquidity_key(pair_index)).await
    }
}
