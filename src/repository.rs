//! Data repository traits for the producers behind the typed accessors.
//!
//! The repositories decouple the cache from the ledger's database layer. A
//! SQL-backed implementation runs the count and liquidity queries; the
//! in-memory implementations in this module are for tests and demos.
//!
//! # Implementing BlockRepository
//!
//! [`StatusFilter::predicate`] yields the `WHERE` clause and its bind value, so
//! a SQL implementation is a single `COUNT(*)` query:
//!
//! ```ignore
//! impl BlockRepository for PgBlocks {
//!     async fn count_blocks(&self, filter: StatusFilter) -> Result<i64> {
//!         let (predicate, status) = filter.predicate();
//!         let sql = format!("SELECT COUNT(*) FROM block WHERE {}", predicate);
//!         sqlx::query_scalar(&sql)
//!             .bind(status)
//!             .fetch_one(&self.pool)
//!             .await
//!             .map_err(|e| Error::RepositoryError(e.to_string()))
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! Return `Error::RepositoryError` for connectivity failures and query
//! timeouts, `Error::DecodeError` for rows that do not parse. Neither is ever
//! cached.

use crate::error::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Lifecycle status of a layer-2 block, stored as an integer column.
///
/// Statuses are ordered: a block only moves forward, so "at least committed"
/// is a range predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlockStatus {
    Proposing,
    Pending,
    Committed,
    Executed,
}

impl BlockStatus {
    /// Integer stored in the `block_status` column.
    pub fn code(self) -> i64 {
        match self {
            BlockStatus::Proposing => 0,
            BlockStatus::Pending => 1,
            BlockStatus::Committed => 2,
            BlockStatus::Executed => 3,
        }
    }
}

/// Which blocks an aggregate count covers. Soft-deleted blocks never count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFilter {
    /// `block_status = ?`
    Equals(BlockStatus),
    /// `block_status >= ?`
    AtLeast(BlockStatus),
}

impl StatusFilter {
    /// SQL predicate and bind value for this filter.
    pub fn predicate(&self) -> (&'static str, i64) {
        match self {
            StatusFilter::Equals(status) => {
                ("block_status = ? and deleted_at is NULL", status.code())
            }
            StatusFilter::AtLeast(status) => {
                ("block_status >= ? and deleted_at is NULL", status.code())
            }
        }
    }

    /// Whether a live block with `status` is counted.
    pub fn matches(&self, status: BlockStatus) -> bool {
        match self {
            StatusFilter::Equals(wanted) => status == *wanted,
            StatusFilter::AtLeast(floor) => status >= *floor,
        }
    }
}

/// Count collaborator behind `BlockCountAccessor`.
///
/// Methods return `Send` futures because producers run on a spawned task.
pub trait BlockRepository: Send + Sync + 'static {
    /// `COUNT(*)` of live blocks matching `filter`.
    ///
    /// # Errors
    /// Returns `Error::RepositoryError` if the query fails.
    fn count_blocks(&self, filter: StatusFilter) -> impl Future<Output = Result<i64>> + Send;
}

/// Latest state of an AMM liquidity pair.
///
/// Reserves are unsigned integer amounts in the asset's smallest unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityInfo {
    pub pair_index: i64,
    pub asset_a_id: i64,
    pub asset_a: u128,
    pub asset_b_id: i64,
    pub asset_b: u128,
    pub lp_amount: u128,
    pub fee_rate: i64,
}

impl LiquidityInfo {
    /// Check the pair can quote a swap of `asset_id` and return the id of the
    /// asset on the other side.
    ///
    /// # Errors
    /// Returns `Error::ValidationError` if either reserve is empty or `asset_id`
    /// is not one of the pair's assets.
    pub fn check_swappable(&self, asset_id: i64) -> Result<i64> {
        if self.asset_a == 0 || self.asset_b == 0 {
            return Err(Error::ValidationError(format!(
                "pair {} has an empty reserve",
                self.pair_index
            )));
        }

        if asset_id == self.asset_a_id {
            Ok(self.asset_b_id)
        } else if asset_id == self.asset_b_id {
            Ok(self.asset_a_id)
        } else {
            Err(Error::ValidationError(format!(
                "asset {} is not in pair {} ({}, {})",
                asset_id, self.pair_index, self.asset_a_id, self.asset_b_id
            )))
        }
    }
}

/// Liquidity collaborator behind `LiquidityAccessor`.
pub trait LiquidityRepository: Send + Sync + 'static {
    /// Latest liquidity for `pair_index`.
    ///
    /// # Returns
    /// - `Ok(Some(info))` - Pair found
    /// - `Ok(None)` - Pair not found (not an error)
    ///
    /// # Errors
    /// Returns `Error::RepositoryError` if the lookup fails.
    fn latest_liquidity(
        &self,
        pair_index: i64,
    ) -> impl Future<Output = Result<Option<LiquidityInfo>>> + Send;
}

// ============================================================================
// In-Memory Test Repositories
// ============================================================================

/// In-memory block table.
///
/// Counts every query it answers so tests can assert how often the cache
/// reached the database.
#[derive(Default)]
pub struct InMemoryBlockRepository {
    blocks: DashMap<u64, BlockStatus>,
    queries: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryBlockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the block at `height`.
    pub fn insert(&self, height: u64, status: BlockStatus) {
        self.blocks.insert(height, status);
    }

    /// Soft-delete the block at `height`.
    pub fn remove(&self, height: u64) {
        self.blocks.remove(&height);
    }

    /// Number of count queries answered (or failed) so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Make every following query fail, as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl BlockRepository for InMemoryBlockRepository {
    async fn count_blocks(&self, filter: StatusFilter) -> Result<i64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::RepositoryError("database unavailable".to_string()));
        }

        let count = self
            .blocks
            .iter()
            .filter(|entry| filter.matches(*entry.value()))
            .count();
        Ok(count as i64)
    }
}

/// In-memory liquidity table keyed by pair index.
#[derive(Default)]
pub struct InMemoryLiquidityRepository {
    pairs: DashMap<i64, LiquidityInfo>,
    queries: AtomicUsize,
}

impl InMemoryLiquidityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pair's state.
    pub fn upsert(&self, info: LiquidityInfo) {
        self.pairs.insert(info.pair_index, info);
    }

    /// Number of lookups answered so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl LiquidityRepository for InMemoryLiquidityRepository {
    async fn latest_liquidity(&self, pair_index: i64) -> Result<Option<LiquidityInfo>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.pairs.get(&pair_index).map(|entry| entry.value().clone()))
    }
}
