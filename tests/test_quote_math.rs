//! Integration tests for quote math and wire encoding
//!
//! Tests cover:
//! - Slippage floor and execution price conventions
//! - Human-amount parsing and rendering as inverse operations
//! - V4 pool id sensitivity to every key field
//! - Packed V3 path and Universal Router input layout
//! - Quoter revert decoding in its three shapes
//!
//! Note: Everything here is pure; no RPC endpoint is needed

use ethers::abi::{self, ParamType, Token as AbiToken};
use ethers::types::{Address, U256};
use ethers::utils::id;
use mig_router_sdk::encoding::{
    decode_quote_revert, decode_revert_reason, encode_v3_path, encode_v4_swap_input, v4_pool_id,
};
use mig_router_sdk::pools::{FeeTier, TokenPair, TradeDirection, V4PoolKey};
use mig_router_sdk::quote::{
    execution_price, format_amount, min_received, parse_amount, price_impact_pct,
};
use mig_router_sdk::tokens::Token;

const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

fn native() -> Token {
    Token::native(1, WETH.parse().unwrap())
}

fn usdc() -> Token {
    Token::erc20(1, USDC.parse().unwrap(), 6, "USDC", "USD Coin")
}

/// The slippage floor never exceeds the quoted output and scales with bps
#[test]
fn test_min_received_floor_properties() {
    let out = U256::from(1_234_567_890_123u64);

    assert_eq!(min_received(out, 0).unwrap(), out);
    assert_eq!(min_received(out, 10_000).unwrap(), U256::zero());
    assert!(min_received(out, 10_001).is_err());

    let mut previous = out;
    for bps in [1u32, 10, 50, 100, 500, 2_500, 9_999] {
        let floor = min_received(out, bps).unwrap();
        assert!(floor < out, "{bps} bps should cost something");
        assert!(floor <= previous, "floor must fall as bps rises");
        previous = floor;
    }

    // 0.5% of 1e18, exactly.
    assert_eq!(
        min_received(U256::exp10(18), 50).unwrap(),
        U256::from(995_000_000_000_000_000u64)
    );
}

/// Execution price is token-per-native for both directions
#[test]
fn test_execution_price_direction_convention() {
    let one_eth = U256::exp10(18);
    let usdc_out = U256::from(4_000_000_000u64); // 4000 USDC at 6 decimals

    let buy = execution_price(TradeDirection::Buy, one_eth, 18, usdc_out, 6);
    assert!((buy - 4000.0).abs() < 1e-9, "buy price: {buy}");

    let sell = execution_price(TradeDirection::Sell, usdc_out, 6, one_eth, 18);
    assert!((sell - 4000.0).abs() < 1e-9, "sell price: {sell}");
}

/// Prices are reported at six significant digits
#[test]
fn test_execution_price_significant_digits() {
    let amount_in = U256::exp10(18);
    let amount_out = U256::from(4_123_456_789u64); // 4123.456789 USDC
    let price = execution_price(TradeDirection::Buy, amount_in, 18, amount_out, 6);
    assert!((price - 4123.46).abs() < 1e-9, "rounded price: {price}");
}

/// parse_amount and format_amount invert each other on clean inputs
#[test]
fn test_amount_parse_format_partnership() {
    for (text, decimals, raw) in [
        ("1.5", 6u8, 1_500_000u64),
        ("0.000001", 6, 1),
        ("42", 0, 42),
        ("1", 18, 1_000_000_000_000_000_000),
    ] {
        let parsed = parse_amount(text, decimals).unwrap();
        assert_eq!(parsed, U256::from(raw), "parse({text})");
        assert_eq!(format_amount(parsed, decimals), text, "format({raw})");
    }

    // Sub-resolution digits are an error, not a silent truncation.
    assert!(parse_amount("0.0000001", 6).is_err());
    assert!(parse_amount("0", 6).is_err());
    assert!(parse_amount("-3", 6).is_err());
}

/// Impact is a percentage clamped to [0, 100]
#[test]
fn test_price_impact_bounds() {
    assert!((price_impact_pct(4000.0, 3960.0) - 1.0).abs() < 1e-9);
    assert_eq!(price_impact_pct(4000.0, 4100.0), 0.0, "favourable move clamps to zero");
    assert_eq!(price_impact_pct(0.0, 3960.0), 0.0, "degenerate mid price");
    assert_eq!(price_impact_pct(f64::NAN, 3960.0), 0.0);
}

/// Every V4 key field participates in the pool id
#[test]
fn test_v4_pool_id_sensitive_to_each_field() {
    let pair = TokenPair::new(native(), usdc()).unwrap();
    let medium = V4PoolKey::for_pair(&pair, FeeTier::Medium);
    let low = V4PoolKey::for_pair(&pair, FeeTier::Low);
    assert_ne!(v4_pool_id(&medium), v4_pool_id(&low));

    // Same fee, different tick spacing: still a different pool.
    let respaced = V4PoolKey {
        tick_spacing: medium.tick_spacing + 1,
        ..medium
    };
    assert_ne!(v4_pool_id(&medium), v4_pool_id(&respaced));

    let hooked = V4PoolKey {
        hooks: Address::repeat_byte(0x99),
        ..medium
    };
    assert_ne!(v4_pool_id(&medium), v4_pool_id(&hooked));
}

/// Packed path bytes: token, 3-byte fee, token, per hop
#[test]
fn test_v3_path_packing_layout() {
    let weth: Address = WETH.parse().unwrap();
    let usdc_addr: Address = USDC.parse().unwrap();
    let dai: Address = DAI.parse().unwrap();

    let path = encode_v3_path(&[weth, usdc_addr, dai], &[500, 3000]).unwrap();
    assert_eq!(path.len(), 20 + 3 + 20 + 3 + 20);
    assert_eq!(&path[0..20], weth.as_bytes());
    assert_eq!(&path[20..23], &[0x00, 0x01, 0xf4]); // 500
    assert_eq!(&path[23..43], usdc_addr.as_bytes());
    assert_eq!(&path[43..46], &[0x00, 0x0b, 0xb8]); // 3000
    assert_eq!(&path[46..66], dai.as_bytes());

    assert!(encode_v3_path(&[weth], &[]).is_err());
    assert!(encode_v3_path(&[weth, usdc_addr], &[500, 3000]).is_err());
}

/// Universal Router V4 input: swap, settle input, take output, in that order
#[test]
fn test_v4_swap_input_settles_input_and_takes_output() {
    let pair = TokenPair::new(native(), usdc()).unwrap();
    let key = V4PoolKey::for_pair(&pair, FeeTier::Medium);
    let amount_in = 1_000_000_000_000_000_000u128;
    let min_out = 3_980_000_000u128;

    // Native maps to currency0, so native-in swaps zeroForOne.
    let input = encode_v4_swap_input(&key, true, amount_in, min_out);

    let decoded = abi::decode(
        &[
            ParamType::Bytes,
            ParamType::Array(Box::new(ParamType::Bytes)),
        ],
        &input,
    )
    .expect("router input should be abi.encode(bytes, bytes[])");

    let actions = match &decoded[0] {
        AbiToken::Bytes(b) => b.clone(),
        other => panic!("expected actions bytes, got {other:?}"),
    };
    assert_eq!(actions, vec![0x06, 0x0c, 0x0f]);

    let params = match &decoded[1] {
        AbiToken::Array(items) => items.clone(),
        other => panic!("expected params array, got {other:?}"),
    };
    assert_eq!(params.len(), 3);

    let settle = match &params[1] {
        AbiToken::Bytes(b) => abi::decode(&[ParamType::Address, ParamType::Uint(256)], b).unwrap(),
        other => panic!("expected settle bytes, got {other:?}"),
    };
    assert_eq!(settle[0], AbiToken::Address(key.currency0));
    assert_eq!(settle[1], AbiToken::Uint(U256::from(amount_in)));

    let take = match &params[2] {
        AbiToken::Bytes(b) => abi::decode(&[ParamType::Address, ParamType::Uint(256)], b).unwrap(),
        other => panic!("expected take bytes, got {other:?}"),
    };
    assert_eq!(take[0], AbiToken::Address(key.currency1));
    assert_eq!(take[1], AbiToken::Uint(U256::from(min_out)));
}

/// The three revert shapes quoters actually produce
#[test]
fn test_quote_revert_decoding_shapes() {
    let amount = U256::from(123_456_789u64);
    let mut word = [0u8; 32];
    amount.to_big_endian(&mut word);

    // Shape 1: a bare 32-byte word.
    assert_eq!(decode_quote_revert(&word), Some(amount));

    // Shape 2: QuoteSwap(uint256) custom error.
    let mut wrapped = id("QuoteSwap(uint256)").to_vec();
    wrapped.extend_from_slice(&word);
    assert_eq!(decode_quote_revert(&wrapped), Some(amount));

    // Shape 3: Error(string) means failure, not an encoded amount.
    let mut error_string = id("Error(string)").to_vec();
    error_string.extend(abi::encode(&[AbiToken::String("SPL".to_string())]));
    assert_eq!(decode_quote_revert(&error_string), None);

    // Garbage stays undecoded.
    assert_eq!(decode_quote_revert(&[0x01, 0x02]), None);
}

/// Revert reasons decode from Error(string) and known custom errors
#[test]
fn test_revert_reason_decoding() {
    let mut error_string = id("Error(string)").to_vec();
    error_string.extend(abi::encode(&[AbiToken::String(
        "Too little received".to_string(),
    )]));
    assert_eq!(
        decode_revert_reason(&error_string).as_deref(),
        Some("Too little received")
    );

    let mut custom = id("V4TooLittleReceived(uint256,uint256)").to_vec();
    custom.extend(abi::encode(&[
        AbiToken::Uint(U256::from(100u64)),
        AbiToken::Uint(U256::from(99u64)),
    ]));
    let reason = decode_revert_reason(&custom).expect("known custom error");
    assert!(reason.contains("slippage floor"), "got: {reason}");

    assert_eq!(decode_revert_reason(&[]), None);
}
