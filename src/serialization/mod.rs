//! Postcard-based cache serialization with versioned, type-tagged envelopes.
//!
//! This module is the decode contract between the byte-oriented stores and the
//! typed callers of [`CacheAside`](crate::CacheAside). Stores never interpret
//! the bytes; every read goes through [`deserialize_from_cache`].
//!
//! # Architecture
//!
//! Every cache entry follows this format:
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (varint)│ TYPE TAG (string)│POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────┴──────────────────────────┘
//!   "LCKE"              u32               type_name::<T>()    postcard::to_allocvec(T)
//! ```
//!
//! Postcard is not self-describing: the bytes of an `i64` decode happily as
//! an `f64`. The type tag is what turns such a read into
//! [`Error::SchemaMismatch`] instead of a silently wrong price.
//!
//! # Example
//!
//! ```rust
//! use ledger_cache::serialization::{serialize_for_cache, deserialize_from_cache};
//! use ledger_cache::Error;
//!
//! # fn main() -> ledger_cache::Result<()> {
//! let bytes = serialize_for_cache(&42000.5_f64)?;
//!
//! let price: f64 = deserialize_from_cache(&bytes)?;
//! assert_eq!(price, 42000.5);
//!
//! let wrong: ledger_cache::Result<i64> = deserialize_from_cache(&bytes);
//! assert!(matches!(wrong, Err(Error::SchemaMismatch { .. })));
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header for entries written by this crate: b"LCKE"
pub const CACHE_MAGIC: [u8; 4] = *b"LCKE";

/// Current schema version.
///
/// Increment when the envelope layout changes or when cached types change
/// shape. Entries carrying another version are evicted and recomputed.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for cache entries.
///
/// # Example
///
/// ```rust
/// use ledger_cache::serialization::CacheEnvelope;
///
/// let envelope = CacheEnvelope::new(17_i64);
/// assert_eq!(envelope.magic, *b"LCKE");
/// assert_eq!(envelope.type_tag, "i64");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"LCKE"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// Rust type name of the payload
    pub type_tag: String,
    /// The actual cached data
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Create a new envelope with current magic, version and the payload's type tag.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            type_tag: type_tag::<T>().to_string(),
            payload,
        }
    }
}

/// Envelope fields preceding the payload, decoded without knowing the payload type.
#[derive(Deserialize, Debug)]
struct EnvelopeHeader {
    magic: [u8; 4],
    version: u32,
    type_tag: String,
}

/// Type tag recorded for values of type `T`.
pub fn type_tag<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// Serialize a value with envelope for cache storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope {
        magic: CACHE_MAGIC,
        version: CURRENT_SCHEMA_VERSION,
        type_tag: type_tag::<T>().to_string(),
        payload: value,
    };
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from cache storage with validation.
///
/// Checks, in order:
/// 1. the envelope header decodes and carries the magic b"LCKE"
/// 2. the schema version matches `CURRENT_SCHEMA_VERSION`
/// 3. the type tag matches `T`
/// 4. the Postcard payload decodes as `T`
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: undecodable header or bad magic
/// - `Error::VersionMismatch`: schema version mismatch
/// - `Error::SchemaMismatch`: the entry holds another type
/// - `Error::DeserializationError`: corrupted payload
pub fn deserialize_from_cache<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (header, payload) = postcard::take_from_bytes::<EnvelopeHeader>(bytes).map_err(|e| {
        log::error!("Cache envelope decode failed: {}", e);
        Error::InvalidCacheEntry(format!("Undecodable envelope: {}", e))
    })?;

    if header.magic != CACHE_MAGIC {
        log::warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC,
            header.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, header.magic
        )));
    }

    if header.version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            header.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: header.version,
        });
    }

    let expected = type_tag::<T>();
    if header.type_tag != expected {
        return Err(Error::SchemaMismatch {
            expected: expected.to_string(),
            found: header.type_tag,
        });
    }

    postcard::from_bytes(payload).map_err(|e| {
        log::error!("Cache payload decode failed for {}: {}", expected, e);
        Error::DeserializationError(e.to_string())
    })
}
