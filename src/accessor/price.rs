//! Currency prices from an upstream quote API, cached per symbol.

use crate::aside::{Fetched, OperationConfig};
use crate::backend::CacheBackend;
use crate::config::PriceConfig;
use crate::error::{Error, Result};
use crate::service::CacheService;
use crate::strategy::{CacheStrategy, MissingPolicy};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the upstream API key.
pub const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

/// Quote currency the accessor reads.
pub const QUOTE_CURRENCY: &str = "USD";

/// One coin entry of a latest-quotes response.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct QuoteLatest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    pub symbol: String,
    pub quote: HashMap<String, Quote>,
}

/// Price of a coin in one quote currency.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Quote {
    /// `null` upstream for inactive coins.
    pub price: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl QuoteLatest {
    /// Price in `currency`.
    ///
    /// # Errors
    /// Returns `Error::SchemaMismatch` if the entry has no price in `currency`.
    pub fn price_in(&self, currency: &str) -> Result<f64> {
        self.quote
            .get(currency)
            .and_then(|quote| quote.price)
            .ok_or_else(|| {
                let mut available: Vec<&str> = self.quote.keys().map(String::as_str).collect();
                available.sort_unstable();
                Error::SchemaMismatch {
                    expected: format!("quote.{}.price for {}", currency, self.symbol),
                    found: format!("quote currencies {:?}", available),
                }
            })
    }
}

/// Upstream source of latest quotes.
///
/// Returns quotes keyed by each coin's own `symbol` field. Methods return
/// `Send` futures because producers run on a spawned task.
pub trait QuoteSource: Send + Sync + 'static {
    /// # Errors
    /// `Error::TransportError` when the upstream cannot be reached or answers
    /// with a failure status, `Error::DecodeError` when the body does not parse.
    fn latest_quotes(
        &self,
        symbol: &str,
    ) -> impl Future<Output = Result<HashMap<String, QuoteLatest>>> + Send;
}

/// Parse a latest-quotes body into quotes keyed by symbol.
///
/// `data` maps arbitrary ids to coin objects (or, in newer API versions, to
/// arrays of coin objects); the id is ignored and each coin is re-keyed by
/// its own `symbol`.
///
/// # Errors
/// Returns `Error::DecodeError` if the body is not JSON, `data` is not an
/// object, or a coin entry does not have the expected shape.
pub fn parse_latest_quotes(body: &[u8]) -> Result<HashMap<String, QuoteLatest>> {
    let mut root: serde_json::Value = serde_json::from_slice(body)?;

    let data = match root.get_mut("data").map(serde_json::Value::take) {
        Some(serde_json::Value::Object(data)) => data,
        Some(other) => {
            return Err(Error::DecodeError(format!(
                "quotes response: `data` is not an object: {}",
                other
            )))
        }
        None => {
            return Err(Error::DecodeError(
                "quotes response has no `data` field".to_string(),
            ))
        }
    };

    let mut quotes = HashMap::with_capacity(data.len());
    for (id, entry) in data {
        let coins = match entry {
            serde_json::Value::Array(coins) => coins,
            coin => vec![coin],
        };
        for coin in coins {
            let quote: QuoteLatest = serde_json::from_value(coin).map_err(|e| {
                Error::DecodeError(format!("quotes response entry {}: {}", id, e))
            })?;
            quotes.insert(quote.symbol.clone(), quote);
        }
    }

    Ok(quotes)
}

/// `QuoteSource` over the CoinMarketCap latest-quotes endpoint.
///
/// Requests `GET {base_url}{symbol}` with the API key header.
#[derive(Clone)]
pub struct CmcQuoteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CmcQuoteClient {
    /// Build a client with its own connection pool and request timeout.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the HTTP client cannot be built.
    pub fn new(config: &PriceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(
            http,
            config.base_url.clone(),
            config.api_key.clone(),
        ))
    }

    /// Use an existing `reqwest::Client` (shared pool, custom TLS, ...).
    pub fn with_client(http: reqwest::Client, base_url: String, api_key: String) -> Self {
        CmcQuoteClient {
            http,
            base_url,
            api_key,
        }
    }
}

impl QuoteSource for CmcQuoteClient {
    async fn latest_quotes(&self, symbol: &str) -> Result<HashMap<String, QuoteLatest>> {
        let url = format!("{}{}", self.base_url, symbol);

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::TransportError(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Quote upstream answered {} for {}", status, symbol);
            return Err(Error::TransportError(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            Error::TransportError(format!("Failed to read body from {}: {}", url, e))
        })?;

        let quotes = parse_latest_quotes(&body)?;
        debug!("✓ Fetched {} quote(s) for {}", quotes.len(), symbol);
        Ok(quotes)
    }
}

/// Cached USD prices, keyed by the bare symbol (`BTC`).
pub struct PriceAccessor<B: CacheBackend, Q: QuoteSource> {
    cache: CacheService<B>,
    source: Arc<Q>,
    ttl: Duration,
    missing: MissingPolicy,
}

impl<B: CacheBackend, Q: QuoteSource> PriceAccessor<B, Q> {
    pub fn new(cache: CacheService<B>, source: Arc<Q>, config: &PriceConfig) -> Self {
        PriceAccessor {
            cache,
            source,
            ttl: config.ttl(),
            missing: config.missing,
        }
    }

    /// USD price of `symbol`.
    ///
    /// A symbol the upstream does not know is handled by the configured
    /// `MissingPolicy`; by default it yields `0.0` and that zero is cached
    /// until TTL expiry.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: empty symbol
    /// - `Error::TransportError` / `Error::DecodeError`: upstream failure (uncached)
    /// - `Error::SchemaMismatch`: the coin has no USD price, or the cache
    ///   entry for `symbol` is not an `f64`
    /// - `Error::NotFound`: unknown symbol with `MissingPolicy::Fail`
    /// - any error of `CacheService::fetch`
    pub async fn currency_price(&self, symbol: &str) -> Result<f64> {
        self.fetch_price(symbol, CacheStrategy::Refresh)
            .await
            .map(|fetched| fetched.value)
    }

    /// Like [`currency_price`](Self::currency_price) with an explicit strategy,
    /// reporting whether the price was cached, computed or not found.
    ///
    /// # Errors
    /// Same as `currency_price`.
    pub async fn fetch_price(
        &self,
        symbol: &str,
        strategy: CacheStrategy,
    ) -> Result<Fetched<f64>> {
        if symbol.is_empty() {
            return Err(Error::ValidationError("empty currency symbol".to_string()));
        }

        let source = Arc::clone(&self.source);
        let owned_symbol = symbol.to_string();
        let producer = move || async move {
            let quotes = source.latest_quotes(&owned_symbol).await?;
            match quotes.get(&owned_symbol) {
                Some(quote) => quote.price_in(QUOTE_CURRENCY).map(Some),
                None => {
                    debug!("No quote for {} in upstream response", owned_symbol);
                    Ok(None)
                }
            }
        };

        let config = OperationConfig::default()
            .with_ttl(self.ttl)
            .with_missing(self.missing);

        self.cache
            .fetch(symbol, 0.0_f64, producer, strategy, config)
            .await
    }

    /// Drop the cached price of `symbol`.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the store cannot be reached.
    pub async fn invalidate(&self, symbol: &str) -> Result<()> {
        self.cache.invalidate(symbol).await
    }
}
