//! Cache key construction.
//!
//! Keys are deterministic functions of (resource, parameters): the same inputs
//! always produce the same key, which is what makes hits possible across calls.
//!
//! Namespaced keys look like `cache::{namespace}:{part}:{part}`, e.g.
//! `cache::block:executed_count` or `cache::liquidity:7`.

/// Prefix shared by all namespaced keys.
pub const KEY_PREFIX: &str = "cache::";

/// Builder for cache keys.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Build a namespaced key: `cache::{namespace}:{parts joined by ':'}`.
    pub fn namespaced(namespace: &str, parts: &[&dyn std::fmt::Display]) -> String {
        let mut key = format!("{}{}", KEY_PREFIX, namespace);
        for part in parts {
            key.push(':');
            key.push_str(&part.to_string());
        }
        key
    }

    /// Build key with custom prefix and no namespace marker: `{prefix}:{id}`.
    pub fn build_with_prefix(prefix: &str, id: &dyn std::fmt::Display) -> String {
        format!("{}:{}", prefix, id)
    }

    /// Build composite key from multiple parts.
    pub fn build_composite(parts: &[&str]) -> String {
        parts.join(":")
    }

    /// Namespace of a key, used to pick a TTL.
    ///
    /// `cache::block:executed_count` → `block`; keys without the prefix
    /// (bare price symbols) have the empty namespace.
    pub fn namespace_of(key: &str) -> &str {
        key.strip_prefix(KEY_PREFIX)
            .map(|rest| rest.split(':').next().unwrap_or(rest))
            .unwrap_or("")
    }
}
