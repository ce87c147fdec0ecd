//! Bound shared by every value that passes through the cache.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait implemented by every type that can be stored by [`CacheAside`](crate::CacheAside).
///
/// Blanket-implemented for any `Serialize + DeserializeOwned + Send + 'static`
/// type: prices (`f64`), counts (`i64`), strings and records alike.
///
/// # Example
///
/// ```
/// use ledger_cache::CacheValue;
///
/// let bytes = 42000.5_f64.serialize_for_cache().unwrap();
/// assert_eq!(f64::deserialize_from_cache(&bytes).unwrap(), 42000.5);
/// assert_eq!(<f64 as CacheValue>::type_tag(), "f64");
/// ```
pub trait CacheValue: Serialize + DeserializeOwned + Send + 'static {
    /// Tag written into the envelope and compared on every read.
    fn type_tag() -> &'static str {
        crate::serialization::type_tag::<Self>()
    }

    /// Serialize for cache storage. See `crate::serialization`.
    fn serialize_for_cache(&self) -> Result<Vec<u8>> {
        crate::serialization::serialize_for_cache(self)
    }

    /// Deserialize from cache storage, rejecting entries of another type.
    fn deserialize_from_cache(bytes: &[u8]) -> Result<Self> {
        crate::serialization::deserialize_from_cache(bytes)
    }
}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Send + 'static {}
