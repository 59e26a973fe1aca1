//! Calldata construction and revert decoding for both router generations.
//!
//! Everything here is pure byte work: no provider, no signer. The V3 side
//! produces periphery-router calldata (exactInput/exactInputSingle wrapped
//! in the router's own multicall), the V4 side produces Universal Router
//! command batches, and the decoding half recovers quoted amounts and revert
//! reasons from raw return data.

use crate::errors::TradeError;
use crate::pools::V4PoolKey;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};
use once_cell::sync::Lazy;

/// Universal Router command byte that dispatches a V4 action batch.
pub const COMMAND_V4_SWAP: u8 = 0x10;

/// V4 planner action bytes. The swap path only drives three of them, the
/// liquidity actions are listed because position managers share the planner.
pub mod v4_actions {
    pub const INCREASE_LIQUIDITY: u8 = 0x00;
    pub const DECREASE_LIQUIDITY: u8 = 0x01;
    pub const MINT_POSITION: u8 = 0x02;
    pub const BURN_POSITION: u8 = 0x03;
    pub const SWAP_EXACT_IN_SINGLE: u8 = 0x06;
    pub const SWAP_EXACT_IN: u8 = 0x07;
    pub const SWAP_EXACT_OUT_SINGLE: u8 = 0x08;
    pub const SWAP_EXACT_OUT: u8 = 0x09;
    pub const SETTLE: u8 = 0x0b;
    pub const SETTLE_ALL: u8 = 0x0c;
    pub const TAKE: u8 = 0x0e;
    pub const TAKE_ALL: u8 = 0x0f;
}

static QUOTE_SWAP_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| id("QuoteSwap(uint256)"));
static ERROR_STRING_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| id("Error(string)"));
static PANIC_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| id("Panic(uint256)"));
static UNEXPECTED_REVERT_BYTES_SELECTOR: Lazy<[u8; 4]> =
    Lazy::new(|| id("UnexpectedRevertBytes(bytes)"));

static EXACT_INPUT_SINGLE_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| {
    id("exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))")
});
static EXACT_INPUT_SELECTOR: Lazy<[u8; 4]> =
    Lazy::new(|| id("exactInput((bytes,address,uint256,uint256,uint256))"));
static ROUTER_MULTICALL_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| id("multicall(bytes[])"));
static UNWRAP_WETH9_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| id("unwrapWETH9(uint256,address)"));

/// Custom errors worth translating for users. Signature to message.
static KNOWN_REVERTS: Lazy<Vec<([u8; 4], &'static str)>> = Lazy::new(|| {
    vec![
        (
            id("V4TooLittleReceived(uint256,uint256)"),
            "amount received fell below the slippage floor",
        ),
        (
            id("V4TooMuchRequested(uint256,uint256)"),
            "amount requested exceeded the slippage ceiling",
        ),
        (
            id("TransactionDeadlinePassed()"),
            "transaction deadline passed",
        ),
    ]
});

fn int24_to_u256(value: i32) -> U256 {
    if value >= 0 {
        U256::from(value as u32)
    } else {
        // Two's complement over the full 256-bit word.
        U256::MAX - U256::from(value.unsigned_abs()) + 1
    }
}

fn with_selector(selector: &[u8; 4], body: Vec<u8>) -> Bytes {
    let mut data = Vec::with_capacity(4 + body.len());
    data.extend_from_slice(selector);
    data.extend(body);
    Bytes::from(data)
}

fn pool_key_token(key: &V4PoolKey) -> Token {
    Token::Tuple(vec![
        Token::Address(key.currency0),
        Token::Address(key.currency1),
        Token::Uint(U256::from(key.fee_pips)),
        Token::Int(int24_to_u256(key.tick_spacing)),
        Token::Address(key.hooks),
    ])
}

/// abi.encode(poolKey): five 32-byte words.
pub fn encode_pool_key(key: &V4PoolKey) -> Vec<u8> {
    abi::encode(&[pool_key_token(key)])
}

/// keccak256(abi.encode(poolKey)), the PoolManager's pool id. Every key
/// field participates, so the same pair at a different tick spacing hashes
/// to a different pool.
pub fn v4_pool_id(key: &V4PoolKey) -> H256 {
    H256::from(keccak256(encode_pool_key(key)))
}

/// Packed V3 path: token (fee token)*, fees as 3 big-endian bytes.
pub fn encode_v3_path(tokens: &[Address], fees: &[u32]) -> Result<Bytes, TradeError> {
    if tokens.len() < 2 || fees.len() != tokens.len() - 1 {
        return Err(TradeError::InvalidInput(format!(
            "path of {} tokens needs {} fees, got {}",
            tokens.len(),
            tokens.len().saturating_sub(1),
            fees.len()
        )));
    }

    let mut packed = Vec::with_capacity(tokens.len() * 20 + fees.len() * 3);
    packed.extend_from_slice(tokens[0].as_bytes());
    for (token, fee) in tokens[1..].iter().zip(fees) {
        let fee_bytes = fee.to_be_bytes();
        packed.extend_from_slice(&fee_bytes[1..4]);
        packed.extend_from_slice(token.as_bytes());
    }
    Ok(Bytes::from(packed))
}

/// SwapRouter exactInputSingle parameters in declaration order.
#[derive(Debug, Clone)]
pub struct V3ExactInputSingle {
    pub token_in: Address,
    pub token_out: Address,
    pub fee_pips: u32,
    pub recipient: Address,
    pub deadline: U256,
    pub amount_in: U256,
    pub amount_out_minimum: U256,
    pub sqrt_price_limit_x96: U256,
}

pub fn encode_v3_exact_input_single(params: &V3ExactInputSingle) -> Bytes {
    let body = abi::encode(&[Token::Tuple(vec![
        Token::Address(params.token_in),
        Token::Address(params.token_out),
        Token::Uint(U256::from(params.fee_pips)),
        Token::Address(params.recipient),
        Token::Uint(params.deadline),
        Token::Uint(params.amount_in),
        Token::Uint(params.amount_out_minimum),
        Token::Uint(params.sqrt_price_limit_x96),
    ])]);
    with_selector(&EXACT_INPUT_SINGLE_SELECTOR, body)
}

pub fn encode_v3_exact_input(
    path: &Bytes,
    recipient: Address,
    deadline: U256,
    amount_in: U256,
    amount_out_minimum: U256,
) -> Bytes {
    let body = abi::encode(&[Token::Tuple(vec![
        Token::Bytes(path.to_vec()),
        Token::Address(recipient),
        Token::Uint(deadline),
        Token::Uint(amount_in),
        Token::Uint(amount_out_minimum),
    ])]);
    with_selector(&EXACT_INPUT_SELECTOR, body)
}

pub fn encode_unwrap_weth9(amount_minimum: U256, recipient: Address) -> Bytes {
    let body = abi::encode(&[Token::Uint(amount_minimum), Token::Address(recipient)]);
    with_selector(&UNWRAP_WETH9_SELECTOR, body)
}

/// The periphery router's own multicall(bytes[]), used to batch a swap with
/// its unwrap step into one transaction.
pub fn encode_router_multicall(calls: &[Bytes]) -> Bytes {
    let body = abi::encode(&[Token::Array(
        calls.iter().map(|c| Token::Bytes(c.to_vec())).collect(),
    )]);
    with_selector(&ROUTER_MULTICALL_SELECTOR, body)
}

/// Universal Router command bytes for one V4 swap batch.
pub fn encode_v4_commands() -> Bytes {
    Bytes::from(vec![COMMAND_V4_SWAP])
}

/// The single Universal Router input for an exact-in single-pool V4 swap:
/// swap, settle the input currency, take the output currency, as one atomic
/// action batch.
pub fn encode_v4_swap_input(
    key: &V4PoolKey,
    zero_for_one: bool,
    amount_in: u128,
    min_amount_out: u128,
) -> Bytes {
    let actions = vec![
        v4_actions::SWAP_EXACT_IN_SINGLE,
        v4_actions::SETTLE_ALL,
        v4_actions::TAKE_ALL,
    ];

    let (input_currency, output_currency) = if zero_for_one {
        (key.currency0, key.currency1)
    } else {
        (key.currency1, key.currency0)
    };

    let swap_params = abi::encode(&[Token::Tuple(vec![
        pool_key_token(key),
        Token::Bool(zero_for_one),
        Token::Uint(U256::from(amount_in)),
        Token::Uint(U256::from(min_amount_out)),
        Token::Bytes(Vec::new()), // hookData
    ])]);
    let settle_params = abi::encode(&[
        Token::Address(input_currency),
        Token::Uint(U256::from(amount_in)),
    ]);
    let take_params = abi::encode(&[
        Token::Address(output_currency),
        Token::Uint(U256::from(min_amount_out)),
    ]);

    let input = abi::encode(&[
        Token::Bytes(actions),
        Token::Array(vec![
            Token::Bytes(swap_params),
            Token::Bytes(settle_params),
            Token::Bytes(take_params),
        ]),
    ]);
    Bytes::from(input)
}

/// Recovers a quoted output amount from quoter revert data.
///
/// Three shapes are accepted: a bare 32-byte word (the V1 quoter replays the
/// amount as its revert payload), `QuoteSwap(uint256)`, and those two nested
/// inside `UnexpectedRevertBytes(bytes)`. Anything else, including
/// `Error(string)`, yields `None`.
pub fn decode_quote_revert(data: &[u8]) -> Option<U256> {
    if data.len() == 32 {
        return Some(U256::from_big_endian(data));
    }
    if data.len() < 4 {
        return None;
    }

    let selector = &data[..4];
    if selector == QUOTE_SWAP_SELECTOR.as_slice() && data.len() == 36 {
        return Some(U256::from_big_endian(&data[4..36]));
    }
    if selector == UNEXPECTED_REVERT_BYTES_SELECTOR.as_slice() {
        let inner = abi::decode(&[ParamType::Bytes], &data[4..]).ok()?;
        if let Some(Token::Bytes(bytes)) = inner.into_iter().next() {
            return decode_quote_revert(&bytes);
        }
    }
    None
}

/// Best-effort human message from raw revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let selector = &data[..4];

    if selector == ERROR_STRING_SELECTOR.as_slice() {
        let decoded = abi::decode(&[ParamType::String], &data[4..]).ok()?;
        return decoded.into_iter().next().and_then(|t| t.into_string());
    }
    if selector == PANIC_SELECTOR.as_slice() {
        let decoded = abi::decode(&[ParamType::Uint(256)], &data[4..]).ok()?;
        let code = decoded.into_iter().next().and_then(|t| t.into_uint())?;
        return Some(format!("panic (code 0x{code:x})"));
    }
    KNOWN_REVERTS
        .iter()
        .find(|(known, _)| selector == known.as_slice())
        .map(|(_, message)| (*message).to_string())
}

/// Last 20 bytes of a 32-byte ABI word as an address.
pub fn decode_address_word(word: &[u8]) -> Option<Address> {
    if word.len() != 32 {
        return None;
    }
    Some(Address::from_slice(&word[12..32]))
}

pub fn decode_uint_word(word: &[u8]) -> Option<U256> {
    if word.len() != 32 {
        return None;
    }
    Some(U256::from_big_endian(word))
}

/// int24 out of a full ABI word, sign-extended. The value sits in the last
/// three bytes; everything above must be the sign extension.
pub fn decode_int24_word(word: &[u8]) -> Option<i32> {
    if word.len() != 32 {
        return None;
    }
    let raw = u32::from_be_bytes([0, word[29], word[30], word[31]]);
    let value = if raw & 0x0080_0000 != 0 {
        (raw | 0xFF00_0000) as i32
    } else {
        raw as i32
    };
    Some(value)
}
