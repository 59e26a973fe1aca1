//! Uniswap V3 adapter: factory discovery, QuoterV1 quoting through `eth_call`,
//! and periphery SwapRouter calldata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::Middleware;
use ethers::types::{Address, U256};
use log::{debug, info, warn};

use crate::contracts::{IUniswapV3Factory, IUniswapV3Pool, UniswapV3Quoter};
use crate::encoding::{
    decode_address_word, decode_int24_word, decode_quote_revert, decode_revert_reason,
    decode_uint_word, encode_router_multicall, encode_unwrap_weth9, encode_v3_exact_input,
    encode_v3_exact_input_single, encode_v3_path, V3ExactInputSingle,
};
use crate::errors::{classify_provider_error, TradeError};
use crate::multicall::{Call, Multicall};
use crate::pools::{
    validate_slot0, FeeTier, PoolDescriptor, PoolId, ProtocolVersion, TokenPair,
};
use crate::protocol::{
    ApprovalNeed, PoolQuote, PreparedCall, ProtocolAdapter, SwapCallParams, TradeRoute,
};
use crate::tokens::Token;
use crate::v3_math::simulate_swap_with_impact;

/// Deployment addresses and thresholds for one chain.
#[derive(Debug, Clone)]
pub struct V3AdapterConfig {
    pub factory: Address,
    pub quoter: Address,
    pub router: Address,
    pub weth: Address,
    /// Pools at or below this liquidity are treated as empty.
    pub min_liquidity: u128,
    pub quote_timeout: Duration,
}

pub struct UniswapV3Adapter<M: Middleware> {
    provider: Arc<M>,
    multicall: Multicall<M>,
    config: V3AdapterConfig,
}

impl<M: Middleware + 'static> UniswapV3Adapter<M> {
    pub fn new(provider: Arc<M>, multicall: Multicall<M>, config: V3AdapterConfig) -> Self {
        Self {
            provider,
            multicall,
            config,
        }
    }

    pub fn router_address(&self) -> Address {
        self.config.router
    }

    /// ERC-20 address a token trades through. Native ETH rides as WETH.
    fn pool_token(&self, token: &Token) -> Address {
        if token.is_native {
            self.config.weth
        } else {
            token.address
        }
    }

    fn getpool_calls(&self, pair: &TokenPair, tiers: &[FeeTier]) -> Result<Vec<Call>, TradeError> {
        let factory = IUniswapV3Factory::new(self.config.factory, self.provider.clone());
        let (token0, token1) = pair.erc20_ordered();
        let (a, b) = (self.pool_token(token0), self.pool_token(token1));

        tiers
            .iter()
            .map(|tier| {
                let call_data = factory
                    .get_pool(a, b, tier.fee_pips())
                    .calldata()
                    .ok_or_else(|| TradeError::Rpc("getPool calldata was empty".to_string()))?;
                Ok(Call {
                    target: self.config.factory,
                    call_data,
                })
            })
            .collect()
    }

    /// Every live pool for the pair across the requested tiers, in tier
    /// preference order. Used directly by the route search, which wants all
    /// of them rather than just the best one.
    pub async fn pools_for_pair(
        &self,
        pair: &TokenPair,
        tiers: &[FeeTier],
    ) -> Result<Vec<PoolDescriptor>, TradeError> {
        let results = self
            .multicall
            .run(self.getpool_calls(pair, tiers)?, None)
            .await?;

        let mut candidates: Vec<(FeeTier, Address)> = Vec::new();
        for (tier, slot) in tiers.iter().zip(results) {
            let address = slot
                .as_deref()
                .and_then(decode_address_word)
                .unwrap_or_else(Address::zero);
            if address != Address::zero() {
                candidates.push((*tier, address));
            }
        }
        if candidates.is_empty() {
            debug!("No V3 pool deployed for {}", pair.describe());
            return Ok(Vec::new());
        }

        // Second round: slot0 + liquidity per deployed pool.
        let pool_stub = IUniswapV3Pool::new(Address::zero(), self.provider.clone());
        let slot0_data = pool_stub
            .slot_0()
            .calldata()
            .ok_or_else(|| TradeError::Rpc("slot0 calldata was empty".to_string()))?;
        let liquidity_data = pool_stub
            .liquidity()
            .calldata()
            .ok_or_else(|| TradeError::Rpc("liquidity calldata was empty".to_string()))?;

        let mut state_calls = Vec::with_capacity(candidates.len() * 2);
        for (_, address) in &candidates {
            state_calls.push(Call {
                target: *address,
                call_data: slot0_data.clone(),
            });
            state_calls.push(Call {
                target: *address,
                call_data: liquidity_data.clone(),
            });
        }
        let states = self.multicall.run(state_calls, None).await?;

        let (token0, token1) = pair.erc20_ordered();
        let (t0, t1) = if self.pool_token(token0) <= self.pool_token(token1) {
            (token0.clone(), token1.clone())
        } else {
            (token1.clone(), token0.clone())
        };

        let mut pools = Vec::new();
        for (index, (tier, address)) in candidates.iter().enumerate() {
            let slot0 = states[index * 2].as_deref();
            let liquidity_word = states[index * 2 + 1].as_deref();

            let (sqrt_price_x96, tick) = match slot0 {
                Some(raw) if raw.len() >= 64 => {
                    let sqrt = decode_uint_word(&raw[0..32]).unwrap_or_default();
                    let tick = decode_int24_word(&raw[32..64]).unwrap_or_default();
                    (sqrt, tick)
                }
                _ => {
                    warn!("slot0 failed for V3 pool {address:?}, skipping");
                    continue;
                }
            };
            let liquidity = match liquidity_word
                .and_then(decode_uint_word)
                .and_then(|v| u128::try_from(v).ok())
            {
                Some(value) => value,
                None => {
                    warn!("liquidity failed for V3 pool {address:?}, skipping");
                    continue;
                }
            };

            if let Err(reason) = validate_slot0(sqrt_price_x96, tick) {
                warn!("V3 pool {address:?} has bad state ({reason}), skipping");
                continue;
            }

            pools.push(PoolDescriptor {
                version: ProtocolVersion::V3,
                id: PoolId::Address(*address),
                token0: t0.clone(),
                token1: t1.clone(),
                fee_tier: *tier,
                liquidity,
                sqrt_price_x96,
                tick,
            });
        }
        Ok(pools)
    }

    /// Quotes a packed multi-hop path through the on-chain quoter.
    pub async fn quote_path(
        &self,
        tokens: &[Token],
        tiers: &[FeeTier],
        amount_in: U256,
    ) -> Result<U256, TradeError> {
        let addresses: Vec<Address> = tokens.iter().map(|t| self.pool_token(t)).collect();
        let fees: Vec<u32> = tiers.iter().map(|t| t.fee_pips()).collect();
        let path = encode_v3_path(&addresses, &fees)?;

        let quoter = UniswapV3Quoter::new(self.config.quoter, self.provider.clone());
        let call = quoter.quote_exact_input(path, amount_in);
        let outcome = tokio::time::timeout(self.config.quote_timeout, call.call())
            .await
            .map_err(|_| {
                TradeError::NetworkTransient(format!(
                    "path quote timed out after {:?}",
                    self.config.quote_timeout
                ))
            })?;

        self.settle_amount(outcome)
    }

    /// Unwraps a quoter call. The V1 quoter family reports the simulated
    /// output through revert data on some deployments; a decodable revert is
    /// therefore a verified amount, not a failure.
    fn settle_amount(
        &self,
        outcome: Result<U256, ethers::contract::ContractError<M>>,
    ) -> Result<U256, TradeError> {
        match outcome {
            Ok(amount_out) => Ok(amount_out),
            Err(error) => match error.as_revert().and_then(|raw| decode_quote_revert(raw)) {
                Some(amount_out) => Ok(amount_out),
                None => Err(self.quote_error(&error)),
            },
        }
    }

    /// Shared tail of the single-hop quoter path.
    fn settle_quote(
        &self,
        pool: &PoolDescriptor,
        zero_for_one: bool,
        amount_in: U256,
        outcome: Result<U256, ethers::contract::ContractError<M>>,
    ) -> Result<PoolQuote, TradeError> {
        let amount_out = self.settle_amount(outcome)?;

        // The quoter answers with the amount alone; the post-swap price
        // comes from the local curve step.
        let sqrt_after = simulate_swap_with_impact(
            amount_in,
            pool.sqrt_price_x96,
            pool.liquidity,
            pool.fee_tier.fee_pips(),
            zero_for_one,
        )
        .ok()
        .map(|(_, _, sqrt)| sqrt);

        Ok(PoolQuote {
            amount_out,
            sqrt_price_after: sqrt_after,
            gas_estimate: None,
            approximate: false,
        })
    }

    fn quote_error(&self, error: &ethers::contract::ContractError<M>) -> TradeError {
        if let Some(revert) = error.as_revert() {
            let reason = decode_revert_reason(revert)
                .unwrap_or_else(|| format!("0x{}", hex::encode(revert)));
            return TradeError::QuoteUnavailable {
                version: ProtocolVersion::V3.to_string(),
                reason,
            };
        }
        classify_provider_error(&error.to_string())
    }
}

#[async_trait]
impl<M: Middleware + 'static> ProtocolAdapter for UniswapV3Adapter<M> {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V3
    }

    async fn find_pool(
        &self,
        pair: &TokenPair,
        tiers: &[FeeTier],
    ) -> Result<Option<PoolDescriptor>, TradeError> {
        let pools = self.pools_for_pair(pair, tiers).await?;

        // Tier preference decides among funded pools, not raw depth.
        for tier in FeeTier::PRIORITY {
            if let Some(pool) = pools
                .iter()
                .find(|p| p.fee_tier == tier && p.is_liquid(self.config.min_liquidity))
            {
                info!("Selected {}", pool.describe());
                return Ok(Some(pool.clone()));
            }
        }
        debug!(
            "V3 has {} deployed pool(s) for {} but none with liquidity",
            pools.len(),
            pair.describe()
        );
        Ok(None)
    }

    async fn quote(
        &self,
        pool: &PoolDescriptor,
        input: &Token,
        amount_in: U256,
    ) -> Result<PoolQuote, TradeError> {
        let zero_for_one = pool.zero_for_one(input);
        let (token_in, token_out) = if zero_for_one {
            (&pool.token0, &pool.token1)
        } else {
            (&pool.token1, &pool.token0)
        };

        let quoter = UniswapV3Quoter::new(self.config.quoter, self.provider.clone());
        let call = quoter.quote_exact_input_single(
            self.pool_token(token_in),
            self.pool_token(token_out),
            pool.fee_tier.fee_pips(),
            amount_in,
            U256::zero(),
        );
        let outcome = tokio::time::timeout(self.config.quote_timeout, call.call())
            .await
            .map_err(|_| {
                TradeError::NetworkTransient(format!(
                    "quote timed out after {:?}",
                    self.config.quote_timeout
                ))
            })?;

        self.settle_quote(pool, zero_for_one, amount_in, outcome)
    }

    fn spot_quote(
        &self,
        pool: &PoolDescriptor,
        input: &Token,
        amount_in: U256,
    ) -> Result<PoolQuote, TradeError> {
        let (amount_out, _, sqrt_after) = simulate_swap_with_impact(
            amount_in,
            pool.sqrt_price_x96,
            pool.liquidity,
            pool.fee_tier.fee_pips(),
            pool.zero_for_one(input),
        )
        .map_err(|reason| TradeError::QuoteUnavailable {
            version: ProtocolVersion::V3.to_string(),
            reason: reason.to_string(),
        })?;

        Ok(PoolQuote {
            amount_out,
            sqrt_price_after: Some(sqrt_after),
            gas_estimate: None,
            approximate: true,
        })
    }

    fn build_swap_call(
        &self,
        route: &TradeRoute,
        params: &SwapCallParams,
    ) -> Result<PreparedCall, TradeError> {
        if route.version != ProtocolVersion::V3 {
            return Err(TradeError::InvalidInput(format!(
                "route targets {}, not Uniswap V3",
                route.version
            )));
        }
        if route.path.len() < 2 || route.fee_tiers.len() != route.path.len() - 1 {
            return Err(TradeError::InvalidInput(
                "route path and fee tiers are misaligned".to_string(),
            ));
        }

        let input = route.input();
        let output = route.output();

        // Native output swaps land on the router first, then unwrap to the
        // recipient inside the same transaction.
        let swap_recipient = if output.is_native {
            self.config.router
        } else {
            params.recipient
        };

        let swap_data = if route.path.len() == 2 {
            encode_v3_exact_input_single(&V3ExactInputSingle {
                token_in: self.pool_token(input),
                token_out: self.pool_token(output),
                fee_pips: route.fee_tiers[0].fee_pips(),
                recipient: swap_recipient,
                deadline: params.deadline,
                amount_in: params.amount_in,
                amount_out_minimum: params.minimum_received,
                sqrt_price_limit_x96: U256::zero(),
            })
        } else {
            let addresses: Vec<Address> =
                route.path.iter().map(|t| self.pool_token(t)).collect();
            let fees: Vec<u32> = route.fee_tiers.iter().map(|t| t.fee_pips()).collect();
            encode_v3_exact_input(
                &encode_v3_path(&addresses, &fees)?,
                swap_recipient,
                params.deadline,
                params.amount_in,
                params.minimum_received,
            )
        };

        let calldata = if output.is_native {
            encode_router_multicall(&[
                swap_data,
                encode_unwrap_weth9(params.minimum_received, params.recipient),
            ])
        } else {
            swap_data
        };

        let value = if input.is_native {
            params.amount_in
        } else {
            U256::zero()
        };
        let approvals = if input.is_native {
            Vec::new()
        } else {
            vec![ApprovalNeed::Erc20 {
                token: input.address,
                spender: self.config.router,
                amount: params.amount_in,
            }]
        };

        Ok(PreparedCall {
            to: self.config.router,
            calldata,
            value,
            approvals,
        })
    }
}
