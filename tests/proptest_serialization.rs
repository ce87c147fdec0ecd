//! Property-based tests for the cache envelope and the typed read path.
//!
//! # Properties Tested
//!
//! 1. **Roundtrip Property**: a value stored as `T` reads back equal as `T`
//! 2. **Determinism Property**: serialize(x) == serialize(x) always
//! 3. **Type Safety Property**: a value stored as `A` never reads back as `B`
//! 4. **Robustness Property**: truncated or arbitrary bytes are an error, never a panic

use ledger_cache::backend::InMemoryBackend;
use ledger_cache::repository::LiquidityInfo;
use ledger_cache::serialization::{
    deserialize_from_cache, serialize_for_cache, CacheEnvelope, CACHE_MAGIC,
    CURRENT_SCHEMA_VERSION,
};
use ledger_cache::{CacheAside, Error};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct BlockSummary {
    height: i64,
    status: String,
    tx_count: u32,
    committed: bool,
}

fn arb_block_summary() -> impl Strategy<Value = BlockSummary> {
    (
        any::<i64>(),
        "[a-z]{0,12}",
        any::<u32>(),
        any::<bool>(),
    )
        .prop_map(|(height, status, tx_count, committed)| BlockSummary {
            height,
            status,
            tx_count,
            committed,
        })
}

fn arb_liquidity() -> impl Strategy<Value = LiquidityInfo> {
    (
        any::<i64>(),
        any::<i64>(),
        any::<u128>(),
        any::<i64>(),
        any::<u128>(),
        any::<u128>(),
        0_i64..10_000,
    )
        .prop_map(
            |(pair_index, asset_a_id, asset_a, asset_b_id, asset_b, lp_amount, fee_rate)| {
                LiquidityInfo {
                    pair_index,
                    asset_a_id,
                    asset_a,
                    asset_b_id,
                    asset_b,
                    lp_amount,
                    fee_rate,
                }
            },
        )
}

/// Finite prices (NaN never equals itself).
fn arb_price() -> impl Strategy<Value = f64> {
    prop::num::f64::NORMAL | prop::num::f64::ZERO | prop::num::f64::SUBNORMAL
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(fut)
}

// ============================================================================
// Property 1: Roundtrip Property
// ============================================================================

proptest! {
    #[test]
    fn prop_price_roundtrip(price in arb_price()) {
        let bytes = serialize_for_cache(&price)?;
        let decoded: f64 = deserialize_from_cache(&bytes)?;
        prop_assert_eq!(price.to_bits(), decoded.to_bits());
    }

    #[test]
    fn prop_count_roundtrip(count in any::<i64>()) {
        let bytes = serialize_for_cache(&count)?;
        let decoded: i64 = deserialize_from_cache(&bytes)?;
        prop_assert_eq!(count, decoded);
    }

    #[test]
    fn prop_string_roundtrip(text in any::<String>()) {
        let bytes = serialize_for_cache(&text)?;
        let decoded: String = deserialize_from_cache(&bytes)?;
        prop_assert_eq!(text, decoded);
    }

    #[test]
    fn prop_record_roundtrip(summary in arb_block_summary()) {
        let bytes = serialize_for_cache(&summary)?;
        let decoded: BlockSummary = deserialize_from_cache(&bytes)?;
        prop_assert_eq!(summary, decoded);
    }

    /// Property: through the whole engine, a stored record reads back equal.
    #[test]
    fn prop_liquidity_through_cache(info in arb_liquidity()) {
        let (computed, cached) = block_on(async {
            let cache = CacheAside::new(InMemoryBackend::new());
            let produced = info.clone();
            let computed = cache
                .get_or_compute("cache::liquidity:0", LiquidityInfo::default(), move || async move {
                    Ok(Some(produced))
                })
                .await;
            let cached = cache.lookup::<LiquidityInfo>("cache::liquidity:0").await;
            (computed, cached)
        });

        prop_assert_eq!(computed, Ok(info.clone()));
        prop_assert_eq!(cached, Ok(Some(info)));
    }
}

// ============================================================================
// Property 2: Determinism and envelope format
// ============================================================================

proptest! {
    #[test]
    fn prop_record_determinism(summary in arb_block_summary()) {
        let bytes1 = serialize_for_cache(&summary)?;
        let bytes2 = serialize_for_cache(&summary)?;
        prop_assert_eq!(bytes1, bytes2, "Serialization must be deterministic");
    }

    #[test]
    fn prop_envelope_format(summary in arb_block_summary()) {
        let bytes = serialize_for_cache(&summary)?;

        prop_assert!(bytes.len() >= 4, "Envelope too small: {} bytes", bytes.len());
        prop_assert_eq!(&bytes[0..4], &CACHE_MAGIC[..]);

        let envelope: CacheEnvelope<BlockSummary> = postcard::from_bytes(&bytes)
            .expect("Failed to deserialize envelope");
        prop_assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
        prop_assert!(envelope.type_tag.ends_with("BlockSummary"));
    }
}

// ============================================================================
// Property 3: Type Safety Property
// ============================================================================

proptest! {
    /// Property: a count never reads back as a price.
    #[test]
    fn prop_count_is_not_a_price(count in any::<i64>()) {
        let bytes = serialize_for_cache(&count)?;
        let result = deserialize_from_cache::<f64>(&bytes);
        prop_assert!(
            matches!(result, Err(Error::SchemaMismatch { .. })),
            "Expected SchemaMismatch, got {:?}",
            result
        );
    }

    /// Property: a string never reads back as a count.
    #[test]
    fn prop_string_is_not_a_count(text in any::<String>()) {
        let bytes = serialize_for_cache(&text)?;
        let result = deserialize_from_cache::<i64>(&bytes);
        prop_assert!(
            matches!(result, Err(Error::SchemaMismatch { .. })),
            "Expected SchemaMismatch, got {:?}",
            result
        );
    }

    /// Property: a record never reads back as a different record.
    #[test]
    fn prop_record_is_not_another_record(summary in arb_block_summary()) {
        let bytes = serialize_for_cache(&summary)?;
        let result = deserialize_from_cache::<LiquidityInfo>(&bytes);
        prop_assert!(
            matches!(result, Err(Error::SchemaMismatch { .. })),
            "Expected SchemaMismatch, got {:?}",
            result
        );
    }
}

// ============================================================================
// Property 4: Robustness Property
// ============================================================================

proptest! {
    /// Property: every strict prefix of a valid entry is rejected.
    #[test]
    fn prop_truncated_entries_rejected(summary in arb_block_summary(), cut in any::<prop::sample::Index>()) {
        let bytes = serialize_for_cache(&summary)?;
        let truncated = &bytes[..cut.index(bytes.len())];

        prop_assert!(deserialize_from_cache::<BlockSummary>(truncated).is_err());
    }

    /// Property: arbitrary bytes never panic the decoder.
    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = deserialize_from_cache::<BlockSummary>(&bytes);
        let _ = deserialize_from_cache::<f64>(&bytes);
    }
}
