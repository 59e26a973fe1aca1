//! The seam between the router core and protocol generations.
//!
//! Each supported generation (V3 periphery router, V4 Universal Router)
//! implements [`ProtocolAdapter`]. The router core only speaks in terms of
//! this trait, so version fallback is a loop over adapters rather than a
//! special case.

use crate::errors::TradeError;
use crate::pools::{FeeTier, PoolDescriptor, ProtocolVersion, TokenPair, TradeDirection};
use crate::tokens::Token;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// One quoted outcome for a fixed input amount against a single pool.
#[derive(Debug, Clone)]
pub struct PoolQuote {
    pub amount_out: U256,
    /// Post-swap pool price, when the quoting path produces one.
    pub sqrt_price_after: Option<U256>,
    pub gas_estimate: Option<U256>,
    /// True when the number came from local pool math instead of the
    /// on-chain quoter and should be labelled as an estimate.
    pub approximate: bool,
}

/// Caller-side inputs for turning a route into calldata.
#[derive(Debug, Clone)]
pub struct SwapCallParams {
    pub recipient: Address,
    pub deadline: U256,
    pub amount_in: U256,
    pub minimum_received: U256,
}

/// An allowance that must hold before the swap call can succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalNeed {
    /// Plain ERC-20 allowance from the owner to the spender.
    Erc20 {
        token: Address,
        spender: Address,
        amount: U256,
    },
    /// Permit2 scheme: the token first approves the Permit2 contract, then
    /// Permit2 grants a bounded, expiring allowance to the spender.
    Permit2 {
        token: Address,
        permit2: Address,
        spender: Address,
        amount: U256,
    },
}

/// A fully-encoded transaction the executor can simulate and send.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub approvals: Vec<ApprovalNeed>,
}

/// A priced trade, ready for display or execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRoute {
    pub version: ProtocolVersion,
    pub direction: TradeDirection,
    /// Tokens visited in order, input first. Two entries for a direct swap.
    pub path: Vec<Token>,
    /// One tier per hop, aligned with consecutive path pairs.
    pub fee_tiers: Vec<FeeTier>,
    pub amount_in: U256,
    pub amount_out: U256,
    pub minimum_received: U256,
    /// Display price in token-per-native terms: output/input for buys,
    /// input/output for sells.
    pub execution_price: f64,
    pub price_impact_pct: f64,
    pub slippage_bps: u32,
    pub approximate: bool,
    pub quoted_at: DateTime<Utc>,
}

impl TradeRoute {
    pub fn input(&self) -> &Token {
        &self.path[0]
    }

    pub fn output(&self) -> &Token {
        &self.path[self.path.len() - 1]
    }

    pub fn hops(&self) -> usize {
        self.fee_tiers.len()
    }

    /// One-line summary for logs.
    pub fn describe(&self) -> String {
        let legs: Vec<&str> = self.path.iter().map(|t| t.symbol.as_str()).collect();
        let marker = if self.approximate { " (estimated)" } else { "" };
        format!(
            "{} {} via {} [{}]{}",
            self.version,
            legs.join(" -> "),
            self.fee_tiers
                .iter()
                .map(|t| t.label())
                .collect::<Vec<_>>()
                .join("+"),
            self.direction,
            marker
        )
    }
}

/// One protocol generation's view of discovery, quoting and execution.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// Probes every requested fee tier and returns the best-funded live
    /// pool, or `None` when the pair has no usable pool on this version.
    async fn find_pool(
        &self,
        pair: &TokenPair,
        tiers: &[FeeTier],
    ) -> Result<Option<PoolDescriptor>, TradeError>;

    /// Authoritative quote through the on-chain quoter.
    async fn quote(
        &self,
        pool: &PoolDescriptor,
        input: &Token,
        amount_in: U256,
    ) -> Result<PoolQuote, TradeError>;

    /// Local fallback quote from cached pool state. Always approximate.
    fn spot_quote(
        &self,
        pool: &PoolDescriptor,
        input: &Token,
        amount_in: U256,
    ) -> Result<PoolQuote, TradeError>;

    /// Encodes the swap transaction plus the allowances it depends on.
    fn build_swap_call(
        &self,
        route: &TradeRoute,
        params: &SwapCallParams,
    ) -> Result<PreparedCall, TradeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::ProtocolVersion;
    use crate::tokens::Token;

    fn weth() -> Token {
        Token::native(1, "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".parse().unwrap())
    }

    fn usdc() -> Token {
        Token::erc20(
            1,
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse().unwrap(),
            6,
            "USDC",
            "USD Coin",
        )
    }

    #[test]
    fn test_route_describe_names_legs_and_version() {
        let route = TradeRoute {
            version: ProtocolVersion::V4,
            direction: TradeDirection::Buy,
            path: vec![weth(), usdc()],
            fee_tiers: vec![FeeTier::Medium],
            amount_in: U256::exp10(18),
            amount_out: U256::from(4_000_000_000u64),
            minimum_received: U256::from(3_980_000_000u64),
            execution_price: 4000.0,
            price_impact_pct: 0.05,
            slippage_bps: 50,
            approximate: false,
            quoted_at: Utc::now(),
        };

        let line = route.describe();
        assert!(line.contains("Uniswap V4"));
        assert!(line.contains("ETH -> USDC"));
        assert!(line.contains("0.3%"));
        assert!(!line.contains("estimated"));
        assert_eq!(route.hops(), 1);
        assert_eq!(route.input().symbol, "ETH");
        assert_eq!(route.output().symbol, "USDC");
    }

    #[test]
    fn test_approximate_route_is_labelled() {
        let route = TradeRoute {
            version: ProtocolVersion::V3,
            direction: TradeDirection::Sell,
            path: vec![usdc(), weth()],
            fee_tiers: vec![FeeTier::Low],
            amount_in: U256::from(4_000_000_000u64),
            amount_out: U256::exp10(18),
            minimum_received: U256::exp10(18),
            execution_price: 4000.0,
            price_impact_pct: 0.0,
            slippage_bps: 50,
            approximate: true,
            quoted_at: Utc::now(),
        };
        assert!(route.describe().contains("estimated"));
    }
}
