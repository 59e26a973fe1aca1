//! Pool identity and observed state, shared by discovery and routing.

use crate::errors::TradeError;
use crate::tokens::Token;
use crate::v3_math;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V3,
    V4,
}

impl ProtocolVersion {
    pub fn label(self) -> &'static str {
        match self {
            ProtocolVersion::V3 => "Uniswap V3",
            ProtocolVersion::V4 => "Uniswap V4",
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Buy means native in, token out. Sell is the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        })
    }
}

/// The four canonical fee tiers, shared by both protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeTier {
    Lowest,
    Low,
    Medium,
    High,
}

impl FeeTier {
    pub const ALL: [FeeTier; 4] = [FeeTier::Lowest, FeeTier::Low, FeeTier::Medium, FeeTier::High];

    /// Probe order when picking a single pool for a pair. Most pairs
    /// concentrate depth in the 0.3% tier, so it goes first.
    pub const PRIORITY: [FeeTier; 4] = [
        FeeTier::Medium,
        FeeTier::Low,
        FeeTier::High,
        FeeTier::Lowest,
    ];

    /// Fee in pips, hundredths of a basis point. This is the raw `uint24`
    /// the contracts use.
    pub const fn fee_pips(self) -> u32 {
        match self {
            FeeTier::Lowest => 100,
            FeeTier::Low => 500,
            FeeTier::Medium => 3000,
            FeeTier::High => 10000,
        }
    }

    /// Tick spacing paired with the tier in V4 pool keys.
    pub const fn tick_spacing(self) -> i32 {
        match self {
            FeeTier::Lowest => 1,
            FeeTier::Low => 10,
            FeeTier::Medium => 60,
            FeeTier::High => 200,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            FeeTier::Lowest => "0.01%",
            FeeTier::Low => "0.05%",
            FeeTier::Medium => "0.3%",
            FeeTier::High => "1%",
        }
    }

    pub fn from_fee_pips(fee_pips: u32) -> Option<FeeTier> {
        Self::ALL.into_iter().find(|t| t.fee_pips() == fee_pips)
    }
}

impl std::fmt::Display for FeeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An unordered pair of distinct tokens. The factory interface takes the
/// pair in either order, so ordering is left to each protocol's key rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub token_a: Token,
    pub token_b: Token,
}

impl TokenPair {
    pub fn new(token_a: Token, token_b: Token) -> Result<Self, TradeError> {
        if token_a == token_b {
            return Err(TradeError::InvalidInput(format!(
                "cannot trade {} against itself",
                token_a.symbol
            )));
        }
        Ok(Self { token_a, token_b })
    }

    /// Tokens ordered by ERC-20 address, the V3 pool convention.
    pub fn erc20_ordered(&self) -> (&Token, &Token) {
        if self.token_a.address <= self.token_b.address {
            (&self.token_a, &self.token_b)
        } else {
            (&self.token_b, &self.token_a)
        }
    }

    /// Tokens ordered by V4 currency, which puts native (currency zero)
    /// first regardless of the wrapped address.
    pub fn v4_ordered(&self) -> (&Token, &Token) {
        if self.token_a.v4_currency() <= self.token_b.v4_currency() {
            (&self.token_a, &self.token_b)
        } else {
            (&self.token_b, &self.token_a)
        }
    }

    pub fn describe(&self) -> String {
        format!("{}/{}", self.token_a.symbol, self.token_b.symbol)
    }
}

/// How a pool is addressed: V3 pools are standalone contracts, V4 pools are
/// 32-byte keys into the PoolManager singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolId {
    Address(Address),
    Hash(H256),
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolId::Address(a) => write!(f, "{a:?}"),
            PoolId::Hash(h) => write!(f, "{h:?}"),
        }
    }
}

/// The five fields that uniquely identify a V4 pool. Hashing the ABI
/// encoding of this struct yields the pool id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct V4PoolKey {
    pub currency0: Address,
    pub currency1: Address,
    pub fee_pips: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
}

impl V4PoolKey {
    /// Hookless key for a pair at a tier. Tick spacing is pinned to the
    /// tier's canonical value; a different spacing is a different pool.
    pub fn for_pair(pair: &TokenPair, tier: FeeTier) -> Self {
        let (token0, token1) = pair.v4_ordered();
        Self {
            currency0: token0.v4_currency(),
            currency1: token1.v4_currency(),
            fee_pips: tier.fee_pips(),
            tick_spacing: tier.tick_spacing(),
            hooks: Address::zero(),
        }
    }
}

/// A discovered pool and the state snapshot it was selected on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDescriptor {
    pub version: ProtocolVersion,
    pub id: PoolId,
    pub token0: Token,
    pub token1: Token,
    pub fee_tier: FeeTier,
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

impl PoolDescriptor {
    /// True when swapping `input` into this pool trades token0 for token1.
    pub fn zero_for_one(&self, input: &Token) -> bool {
        input == &self.token0
    }

    pub fn is_liquid(&self, min_liquidity: u128) -> bool {
        self.liquidity > min_liquidity
    }

    /// Mid price in human units: output token per one input token.
    pub fn mid_price(&self, input: &Token) -> f64 {
        let token1_per_token0 = v3_math::price_from_sqrt_x96(
            self.sqrt_price_x96,
            self.token0.decimals,
            self.token1.decimals,
        );
        if self.zero_for_one(input) {
            token1_per_token0
        } else if token1_per_token0 > 0.0 {
            1.0 / token1_per_token0
        } else {
            0.0
        }
    }

    /// One-line summary for logs.
    pub fn describe(&self) -> String {
        format!(
            "{} {}/{} {} pool {} (tick {}, liquidity {})",
            self.version,
            self.token0.symbol,
            self.token1.symbol,
            self.fee_tier,
            self.id,
            self.tick,
            self.liquidity
        )
    }
}

/// Validates slot0 data before a pool is considered for routing. A zero or
/// out-of-range price means uninitialized or corrupt state.
pub fn validate_slot0(sqrt_price_x96: U256, tick: i32) -> Result<(), String> {
    if sqrt_price_x96.is_zero() {
        return Err("sqrt_price_x96 is zero (uninitialized pool)".to_string());
    }
    if sqrt_price_x96 < v3_math::MIN_SQRT_RATIO || sqrt_price_x96 > v3_math::MAX_SQRT_RATIO {
        return Err(format!(
            "sqrt_price_x96 {sqrt_price_x96} outside valid range"
        ));
    }
    if !(v3_math::MIN_TICK..=v3_math::MAX_TICK).contains(&tick) {
        return Err(format!("tick {tick} outside valid range"));
    }
    Ok(())
}
