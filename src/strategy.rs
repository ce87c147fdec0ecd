//! Read strategies for [`CacheAside::fetch`](crate::CacheAside::fetch).
//!
//! | Strategy | Cache Hit | Cache Miss | Use Case |
//! |----------|-----------|-----------|----------|
//! | **Refresh** | Return | Produce (single-flight), store | Default read path |
//! | **Fresh** | Return | Return zero value, producer not run | Peek without load |
//! | **Invalidate** | Delete, produce, store | Produce, store | After a write |
//! | **Bypass** | Ignore | Produce, store | Force an upstream read |
//!
//! All strategies that run the producer go through the single-flight group,
//! so even `Invalidate` and `Bypass` never run two producers for one key.

/// Strategy enum controlling cache lookup and population.
///
/// # Examples
///
/// ```
/// use ledger_cache::strategy::CacheStrategy;
///
/// assert_eq!(CacheStrategy::default(), CacheStrategy::Refresh);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// **Fresh**: read the store only.
    ///
    /// Flow:
    /// 1. Check store
    /// 2. If hit: return cached value
    /// 3. If miss: return the caller's zero value, marked as a miss
    Fresh,

    /// **Refresh**: cache-aside read.
    ///
    /// Flow:
    /// 1. Check store
    /// 2. If hit: return cached value
    /// 3. If miss: run producer once per key, store, return
    #[default]
    Refresh,

    /// **Invalidate**: drop the entry and recompute.
    ///
    /// Typical use: after a write transaction changed the underlying data.
    Invalidate,

    /// **Bypass**: skip the lookup, recompute and store for later readers.
    Bypass,
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStrategy::Fresh => write!(f, "Fresh"),
            CacheStrategy::Refresh => write!(f, "Refresh"),
            CacheStrategy::Invalidate => write!(f, "Invalidate"),
            CacheStrategy::Bypass => write!(f, "Bypass"),
        }
    }
}

/// What a caller does when the producer reports "nothing found".
///
/// The cache core is neutral; each accessor picks the policy that fits its
/// domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Store the zero value and return it. Later calls hit the cache until TTL
    /// expiry instead of asking the producer again.
    #[default]
    CacheZero,

    /// Return the zero value without storing it; the next call asks again.
    ZeroUncached,

    /// Return `Error::NotFound`; nothing is stored.
    Fail,
}

/// What [`CacheAside`](crate::CacheAside) does when the store cannot be reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Return `Error::StoreUnavailable` to the caller.
    #[default]
    Propagate,

    /// Run the producer directly, uncached, and flag the degraded read.
    ComputeDirect,
}
