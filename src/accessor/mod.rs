//! Typed accessors: one per read path, each binding a key, a result type, a
//! producer and a not-found policy to the shared [`CacheService`](crate::CacheService).
//!
//! | Accessor | Key | Type | Not found |
//! |----------|-----|------|-----------|
//! | [`PriceAccessor`] | `{symbol}` | `f64` | configurable, default cached `0.0` |
//! | [`BlockCountAccessor`] | `cache::block:{executed,committed}_count` | `i64` | n/a (`COUNT(*)`) |
//! | [`LiquidityAccessor`] | `cache::liquidity:{pair_index}` | `LiquidityInfo` | `Error::NotFound` |

pub mod count;
pub mod liquidity;
pub mod price;

pub use count::{BlockCountAccessor, COMMITTED_COUNT_KEY, EXECUTED_COUNT_KEY};
pub use liquidity::{liquidity_key, LiquidityAccessor};
pub use price::{parse_latest_quotes, CmcQuoteClient, PriceAccessor, QuoteLatest, QuoteSource};
