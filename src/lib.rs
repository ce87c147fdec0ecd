//! # ledger-cache
//!
//! Single-flight cache-aside core for the read API of a layer-2 ledger.
//!
//! Every expensive read path (upstream price quotes, aggregate block counts,
//! liquidity lookups) goes through one engine that:
//!
//! - **Deduplicates** concurrent misses: at most one producer runs per key
//! - **Never caches failures**: the next call after an error tries again
//! - **Is generic**: any `Serialize + DeserializeOwned` value, type-checked on every hit
//! - **Expires everything**: every entry carries a TTL
//! - **Swaps stores**: in-process by default, Redis or Memcached behind features
//!
//! ## Quick Start
//!
//! Use [`CacheService`] (a cheap-clone handle) and the typed accessors:
//!
//! ```
//! use ledger_cache::{
//!     backend::InMemoryBackend,
//!     accessor::BlockCountAccessor,
//!     repository::{BlockStatus, InMemoryBlockRepository},
//!     CacheService,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ledger_cache::Result<()> {
//! let repo = Arc::new(InMemoryBlockRepository::new());
//! repo.insert(1, BlockStatus::Executed);
//!
//! let cache = CacheService::new(InMemoryBackend::new());
//! let counts = BlockCountAccessor::new(cache.clone(), repo, Duration::from_secs(10));
//!
//! assert_eq!(counts.executed_blocks_count().await?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ### Custom read paths
//!
//! Any async producer works; the zero value is what "not found" yields:
//!
//! ```
//! use ledger_cache::{CacheAside, backend::InMemoryBackend};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ledger_cache::Result<()> {
//! let cache = CacheAside::new(InMemoryBackend::new());
//!
//! let total: u64 = cache
//!     .get_or_compute("cache::account:total", 0, || async { Ok(Some(1_024)) })
//!     .await?;
//! assert_eq!(total, 1_024);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod accessor;
pub mod aside;
pub mod backend;
pub mod config;
pub mod error;
pub mod flight;
pub mod key;
pub mod observability;
pub mod repository;
pub mod serialization;
pub mod service;
pub mod strategy;
pub mod value;

// Re-exports for convenience
pub use aside::{CacheAside, FetchSource, Fetched, OperationConfig};
pub use backend::CacheBackend;
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use flight::SingleFlightGroup;
pub use service::CacheService;
pub use strategy::{CacheStrategy, MissingPolicy, StoreFailurePolicy};
pub use value::CacheValue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
