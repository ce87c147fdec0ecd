//! Error types for the cache core and its accessors.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache core.
///
/// `Error` is `Clone` because a single producer outcome is handed to every
/// caller waiting on the same key.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Upstream HTTP request could not be built, sent, or read, or the
    /// upstream answered with a non-success status.
    ///
    /// Never cached. The next call retries the upstream.
    TransportError(String),

    /// Upstream response or database row could not be parsed into the expected shape.
    ///
    /// Never cached.
    DecodeError(String),

    /// A value does not have the type or shape the caller expects.
    ///
    /// Raised when:
    /// - a cache hit carries a different type tag than the caller decodes into
    ///   (key-namespace collision or version skew between call sites)
    /// - an upstream quote lacks the field the accessor reads
    ///
    /// Surfaced to the caller, never coerced and never fatal to the process.
    SchemaMismatch {
        /// What the caller expected
        expected: String,
        /// What was actually found
        found: String,
    },

    /// Backing store (Redis, Memcached, ...) could not be reached.
    ///
    /// Distinct from a cache miss. Results computed while the store is
    /// unavailable are not cached.
    StoreUnavailable(String),

    /// Data repository error (count query, liquidity lookup).
    ///
    /// Never cached.
    RepositoryError(String),

    /// The producer found nothing and the accessor's policy treats that as an error.
    NotFound(String),

    /// Serialization failed when converting a value to cache bytes.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes to a value.
    ///
    /// The type tag matched but the payload is corrupted or truncated.
    DeserializationError(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    ///
    /// Indicates bytes under the key that were not written by this crate.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    ///
    /// **Recovery:** the entry is evicted and recomputed on access.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Domain validation failed (e.g. a liquidity pool with an empty reserve).
    ValidationError(String),

    /// Waiting for a value exceeded the caller's deadline.
    Timeout(String),

    /// The caller cancelled while waiting for a value.
    ///
    /// Only the cancelled caller sees this; the in-flight producer keeps running.
    Cancelled(String),

    /// The producer panicked. Reported to every waiter of that call.
    ProducerPanic(String),

    /// Configuration error during initialization.
    ConfigError(String),

    /// Feature not implemented or not enabled.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether the failure is transient and worth retrying on a later call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransportError(_)
                | Error::StoreUnavailable(_)
                | Error::RepositoryError(_)
                | Error::Timeout(_)
                | Error::Cancelled(_)
                | Error::ProducerPanic(_)
        )
    }

    /// Whether the failure points at a programming defect (wrong key namespace,
    /// incompatible cached bytes) rather than a transient condition.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Error::SchemaMismatch { .. }
                | Error::InvalidCacheEntry(_)
                | Error::DeserializationError(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TransportError(msg) => write!(f, "Transport error: {}", msg),
            Error::DecodeError(msg) => write!(f, "Decode error: {}", msg),
            Error::SchemaMismatch { expected, found } => {
                write!(f, "Schema mismatch: expected {}, found {}", expected, found)
            }
            Error::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Error::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            Error::NotFound(key) => write!(f, "Not found: {}", key),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::Cancelled(msg) => write!(f, "Cancelled: {}", msg),
            Error::ProducerPanic(msg) => write!(f, "Producer panicked: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::TransportError(e.to_string())
        } else {
            Error::DecodeError(e.to_string())
        }
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::StoreUnavailable(format!("Redis error: {}", e))
    }
}
