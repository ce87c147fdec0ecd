//! Aggregate block counts for the layer-2 info endpoint.

use crate::aside::OperationConfig;
use crate::backend::CacheBackend;
use crate::error::Result;
use crate::repository::{BlockRepository, BlockStatus, StatusFilter};
use crate::service::CacheService;
use crate::strategy::{CacheStrategy, MissingPolicy};
use std::sync::Arc;
use std::time::Duration;

pub const EXECUTED_COUNT_KEY: &str = "cache::block:executed_count";
pub const COMMITTED_COUNT_KEY: &str = "cache::block:committed_count";

/// Cached `COUNT(*)` queries over the block table.
///
/// A count of zero is a real answer and is cached like any other; query
/// failures propagate and are never cached.
pub struct BlockCountAccessor<B: CacheBackend, R: BlockRepository> {
    cache: CacheService<B>,
    repository: Arc<R>,
    ttl: Duration,
}

impl<B: CacheBackend, R: BlockRepository> BlockCountAccessor<B, R> {
    pub fn new(cache: CacheService<B>, repository: Arc<R>, ttl: Duration) -> Self {
        BlockCountAccessor {
            cache,
            repository,
            ttl,
        }
    }

    /// Number of live blocks in `Executed` status.
    ///
    /// # Errors
    /// `Error::RepositoryError` from the query, or any error of `CacheService::fetch`.
    pub async fn executed_blocks_count(&self) -> Result<i64> {
        self.count(
            EXECUTED_COUNT_KEY,
            StatusFilter::Equals(BlockStatus::Executed),
        )
        .await
    }

    /// Number of live blocks that reached at least `Committed` status.
    ///
    /// # Errors
    /// `Error::RepositoryError` from the query, or any error of `CacheService::fetch`.
    pub async fn committed_blocks_count(&self) -> Result<i64> {
        self.count(
            COMMITTED_COUNT_KEY,
            StatusFilter::AtLeast(BlockStatus::Committed),
        )
        .await
    }

    /// Drop both cached counts, e.g. after a block changed status.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the store cannot be reached.
    pub async fn invalidate(&self) -> Result<()> {
        self.cache.invalidate(EXECUTED_COUNT_KEY).await?;
        self.cache.invalidate(COMMITTED_COUNT_KEY).await
    }

    async fn count(&self, key: &str, filter: StatusFilter) -> Result<i64> {
        let repository = Arc::clone(&self.repository);
        let producer = move || async move { repository.count_blocks(filter).await.map(Some) };

        // COUNT(*) always yields a row; the policy only matters for custom repositories.
        let config = OperationConfig::default()
            .with_ttl(self.ttl)
            .with_missing(MissingPolicy::CacheZero);

        self.cache
            .fetch(key, 0_i64, producer, CacheStrategy::Refresh, config)
            .await
            .map(|fetched| fetched.value)
    }
}
