//! Runtime configuration for the cache core and the typed accessors.
//!
//! Values come from `Default`, from `LEDGER_CACHE_*` environment variables
//! ([`CacheConfig::from_env`]), or from any serde format the host service
//! already uses for its own config file.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `LEDGER_CACHE_DEFAULT_TTL_SECS` | `default_ttl_secs` | 60 |
//! | `LEDGER_CACHE_CAPACITY` | `capacity` | unbounded |
//! | `LEDGER_CACHE_STORE_FAILURE` | `store_failure` | `propagate` |
//! | `LEDGER_CACHE_BLOCK_COUNT_TTL_SECS` | `block_count_ttl_secs` | 10 |
//! | `LEDGER_CACHE_LIQUIDITY_TTL_SECS` | `liquidity_ttl_secs` | 5 |
//! | `LEDGER_CACHE_PRICE_URL` | `price.base_url` | CoinMarketCap quotes endpoint |
//! | `LEDGER_CACHE_PRICE_API_KEY` | `price.api_key` | empty |
//! | `LEDGER_CACHE_PRICE_TTL_SECS` | `price.ttl_secs` | 30 |
//! | `LEDGER_CACHE_PRICE_TIMEOUT_SECS` | `price.request_timeout_secs` | 10 |
//! | `LEDGER_CACHE_PRICE_MISSING` | `price.missing` | `cache_zero` |

use crate::aside::CacheAside;
use crate::backend::{CacheBackend, InMemoryBackend, DEFAULT_TTL};
use crate::error::{Error, Result};
use crate::strategy::{MissingPolicy, StoreFailurePolicy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Default quote endpoint; the symbol is appended verbatim.
pub const DEFAULT_PRICE_URL: &str =
    "https://pro-api.coinmarketcap.com/v1/cryptocurrency/quotes/latest?symbol=";

const ENV_PREFIX: &str = "LEDGER_CACHE_";

/// Settings for the price accessor and its upstream client.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub base_url: String,
    pub api_key: String,
    pub ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub missing: MissingPolicy,
}

impl Default for PriceConfig {
    fn default() -> Self {
        PriceConfig {
            base_url: DEFAULT_PRICE_URL.to_string(),
            api_key: String::new(),
            ttl_secs: 30,
            request_timeout_secs: 10,
            missing: MissingPolicy::CacheZero,
        }
    }
}

impl PriceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Top-level cache configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub capacity: Option<usize>,
    pub store_failure: StoreFailurePolicy,
    pub block_count_ttl_secs: u64,
    pub liquidity_ttl_secs: u64,
    pub price: PriceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_ttl_secs: DEFAULT_TTL.as_secs(),
            capacity: None,
            store_failure: StoreFailurePolicy::Propagate,
            block_count_ttl_secs: 10,
            liquidity_ttl_secs: 5,
            price: PriceConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load from `LEDGER_CACHE_*` environment variables over the defaults.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source (`name -> value`).
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));
        let mut config = CacheConfig::default();

        if let Some(v) = var("DEFAULT_TTL_SECS") {
            config.default_ttl_secs = parse_number("DEFAULT_TTL_SECS", &v)?;
        }
        if let Some(v) = var("CAPACITY") {
            config.capacity = Some(parse_number("CAPACITY", &v)?);
        }
        if let Some(v) = var("STORE_FAILURE") {
            config.store_failure = parse_policy("STORE_FAILURE", &v)?;
        }
        if let Some(v) = var("BLOCK_COUNT_TTL_SECS") {
            config.block_count_ttl_secs = parse_number("BLOCK_COUNT_TTL_SECS", &v)?;
        }
        if let Some(v) = var("LIQUIDITY_TTL_SECS") {
            config.liquidity_ttl_secs = parse_number("LIQUIDITY_TTL_SECS", &v)?;
        }
        if let Some(v) = var("PRICE_URL") {
            config.price.base_url = v;
        }
        if let Some(v) = var("PRICE_API_KEY") {
            config.price.api_key = v;
        }
        if let Some(v) = var("PRICE_TTL_SECS") {
            config.price.ttl_secs = parse_number("PRICE_TTL_SECS", &v)?;
        }
        if let Some(v) = var("PRICE_TIMEOUT_SECS") {
            config.price.request_timeout_secs = parse_number("PRICE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("PRICE_MISSING") {
            config.price.missing = parse_policy("PRICE_MISSING", &v)?;
        }

        debug!("Loaded cache config: {:?}", config.redacted());
        Ok(config)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn block_count_ttl(&self) -> Duration {
        Duration::from_secs(self.block_count_ttl_secs)
    }

    pub fn liquidity_ttl(&self) -> Duration {
        Duration::from_secs(self.liquidity_ttl_secs)
    }

    /// In-process store sized and timed by this config.
    pub fn in_memory_backend(&self) -> InMemoryBackend {
        let backend = match self.capacity {
            Some(capacity) => InMemoryBackend::with_capacity(capacity),
            None => InMemoryBackend::new(),
        };
        backend.with_default_ttl(self.default_ttl())
    }

    /// Cache-aside engine over `backend` with this config's store failure policy.
    pub fn build_aside<B: CacheBackend>(&self, backend: B) -> CacheAside<B> {
        CacheAside::new(backend).with_store_failure_policy(self.store_failure)
    }

    /// Copy safe to log: the API key is masked.
    fn redacted(&self) -> CacheConfig {
        let mut copy = self.clone();
        if !copy.price.api_key.is_empty() {
            copy.price.api_key = "***".to_string();
        }
        copy
    }
}

fn parse_number<N: FromStr>(name: &str, value: &str) -> Result<N> {
    value.trim().parse::<N>().map_err(|_| {
        Error::ConfigError(format!(
            "{}{}: expected a non-negative integer, got {:?}",
            ENV_PREFIX, name, value
        ))
    })
}

fn parse_policy<P: DeserializeOwned>(name: &str, value: &str) -> Result<P> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_string())).map_err(|e| {
        Error::ConfigError(format!("{}{}: {}", ENV_PREFIX, name, e))
    })
}
