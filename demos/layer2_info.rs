//! Layer-2 info API served through ledger-cache.
//!
//! Run with: `cargo run --example layer2_info`
//!
//! Prices come from the CoinMarketCap API when `LEDGER_CACHE_PRICE_API_KEY`
//! is set, from a fixed quote table otherwise.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ledger_cache::accessor::{
    parse_latest_quotes, BlockCountAccessor, CmcQuoteClient, LiquidityAccessor, PriceAccessor,
    QuoteLatest, QuoteSource,
};
use ledger_cache::backend::InMemoryBackend;
use ledger_cache::observability::{CacheCounters, CacheMetrics};
use ledger_cache::repository::{
    BlockStatus, InMemoryBlockRepository, InMemoryLiquidityRepository, LiquidityInfo,
};
use ledger_cache::{CacheConfig, CacheService, Error};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const FIXED_QUOTES: &str = r#"{
    "data": {
        "1": { "id": 1, "name": "Bitcoin", "symbol": "BTC", "quote": { "USD": { "price": 42000.5 } } },
        "1027": { "id": 1027, "name": "Ethereum", "symbol": "ETH", "quote": { "USD": { "price": 3100.25 } } }
    }
}"#;

/// Live upstream or the fixed table.
enum Quotes {
    Live(CmcQuoteClient),
    Fixed,
}

impl QuoteSource for Quotes {
    async fn latest_quotes(&self, symbol: &str) -> ledger_cache::Result<HashMap<String, QuoteLatest>> {
        match self {
            Quotes::Live(client) => client.latest_quotes(symbol).await,
            Quotes::Fixed => {
                // Simulate upstream latency
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                parse_latest_quotes(FIXED_QUOTES.as_bytes())
            }
        }
    }
}

/// Application state
#[derive(Clone)]
struct AppState {
    blocks: Arc<BlockCountAccessor<InMemoryBackend, InMemoryBlockRepository>>,
    prices: Arc<PriceAccessor<InMemoryBackend, Quotes>>,
    liquidity: Arc<LiquidityAccessor<InMemoryBackend, InMemoryLiquidityRepository>>,
    counters: Arc<CacheCounters>,
}

fn error_response(e: Error) -> Response {
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::ValidationError(_) => StatusCode::BAD_REQUEST,
        Error::TransportError(_) | Error::DecodeError(_) | Error::Timeout(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn layer2_info(State(state): State<AppState>) -> Response {
    let counts = tokio::try_join!(
        state.blocks.executed_blocks_count(),
        state.blocks.committed_blocks_count()
    );

    match counts {
        Ok((executed, committed)) => Json(json!({
            "executed_blocks": executed,
            "committed_blocks": committed,
            "version": ledger_cache::VERSION,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn currency_price(Path(symbol): Path<String>, State(state): State<AppState>) -> Response {
    match state.prices.currency_price(&symbol).await {
        Ok(price) => Json(json!({ "symbol": symbol, "usd": price })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn latest_liquidity(Path(pair_index): Path<i64>, State(state): State<AppState>) -> Response {
    match state.liquidity.latest_liquidity(pair_index).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(e),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.counters.snapshot()))
}

fn seed_blocks(repo: &InMemoryBlockRepository) {
    for height in 1..=120 {
        let status = match height {
            1..=100 => BlockStatus::Executed,
            101..=110 => BlockStatus::Committed,
            111..=115 => BlockStatus::Pending,
            _ => BlockStatus::Proposing,
        };
        repo.insert(height, status);
    }
}

fn seed_liquidity(repo: &InMemoryLiquidityRepository) {
    repo.upsert(LiquidityInfo {
        pair_index: 0,
        asset_a_id: 0,
        asset_a: 1_000_000_000_000_000_000,
        asset_b_id: 1,
        asset_b: 2_000_000_000,
        lp_amount: 44_721_359_549_995,
        fee_rate: 30,
    });
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .ok();

    let config = CacheConfig::from_env().expect("Invalid LEDGER_CACHE_* configuration");

    let counters = Arc::new(CacheCounters::new());
    let aside = config
        .build_aside(config.in_memory_backend())
        .with_metrics(Arc::clone(&counters) as Arc<dyn CacheMetrics>);
    let cache = CacheService::from_aside(aside);

    let block_repo = Arc::new(InMemoryBlockRepository::new());
    seed_blocks(&block_repo);
    let liquidity_repo = Arc::new(InMemoryLiquidityRepository::new());
    seed_liquidity(&liquidity_repo);

    let quotes = if config.price.api_key.is_empty() {
        println!("No LEDGER_CACHE_PRICE_API_KEY set, serving fixed quotes");
        Quotes::Fixed
    } else {
        Quotes::Live(CmcQuoteClient::new(&config.price).expect("Failed to build quote client"))
    };

    let state = AppState {
        blocks: Arc::new(BlockCountAccessor::new(
            cache.clone(),
            block_repo,
            config.block_count_ttl(),
        )),
        prices: Arc::new(PriceAccessor::new(
            cache.clone(),
            Arc::new(quotes),
            &config.price,
        )),
        liquidity: Arc::new(LiquidityAccessor::new(
            cache,
            liquidity_repo,
            config.liquidity_ttl(),
        )),
        counters,
    };

    let app = Router::new()
        .route("/api/info", get(layer2_info))
        .route("/api/price/{symbol}", get(currency_price))
        .route("/api/liquidity/{pair_index}", get(latest_liquidity))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .expect("Failed to bind port 3000");

    println!("Server running on http://127.0.0.1:3000");
    println!("Layer-2 info: http://127.0.0.1:3000/api/info");
    println!("Price:        http://127.0.0.1:3000/api/price/BTC");
    println!("Liquidity:    http://127.0.0.1:3000/api/liquidity/0");
    println!("Counters:     http://127.0.0.1:3000/metrics");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
