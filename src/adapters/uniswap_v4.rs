//! Uniswap V4 adapter: StateView discovery against the PoolManager
//! singleton, V4Quoter quoting, and Universal Router command batches.
//!
//! V4 has no per-pool contracts. Pools are derived locally by hashing the
//! pool key, then probed through the StateView lens; an uninitialized pool
//! reads back as an all-zero slot rather than a revert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::Middleware;
use ethers::types::{Address, Bytes, U256};
use log::{debug, info, warn};

use crate::contracts::i_v4_quoter::{PoolKey, QuoteExactSingleParams};
use crate::contracts::{IStateView, IUniversalRouter, IV4Quoter};
use crate::encoding::{
    decode_int24_word, decode_quote_revert, decode_revert_reason, decode_uint_word,
    encode_v4_commands, encode_v4_swap_input, v4_pool_id,
};
use crate::errors::{classify_provider_error, TradeError};
use crate::multicall::{Call, Multicall};
use crate::pools::{
    validate_slot0, FeeTier, PoolDescriptor, PoolId, ProtocolVersion, TokenPair, V4PoolKey,
};
use crate::protocol::{
    ApprovalNeed, PoolQuote, PreparedCall, ProtocolAdapter, SwapCallParams, TradeRoute,
};
use crate::tokens::Token;
use crate::v3_math::simulate_swap_with_impact;

/// Deployment addresses and thresholds for one chain.
#[derive(Debug, Clone)]
pub struct V4AdapterConfig {
    pub state_view: Address,
    pub quoter: Address,
    pub universal_router: Address,
    pub permit2: Address,
    /// Pools at or below this liquidity are treated as empty.
    pub min_liquidity: u128,
    pub quote_timeout: Duration,
}

pub struct UniswapV4Adapter<M: Middleware> {
    provider: Arc<M>,
    multicall: Multicall<M>,
    config: V4AdapterConfig,
}

/// Maps a domain pool key onto the quoter's generated argument structs.
fn quoter_params(key: &V4PoolKey, zero_for_one: bool, exact_amount: u128) -> QuoteExactSingleParams {
    QuoteExactSingleParams {
        pool_key: PoolKey {
            currency_0: key.currency0,
            currency_1: key.currency1,
            fee: key.fee_pips,
            tick_spacing: key.tick_spacing,
            hooks: key.hooks,
        },
        zero_for_one,
        exact_amount,
        hook_data: Bytes::new(),
    }
}

impl<M: Middleware + 'static> UniswapV4Adapter<M> {
    pub fn new(provider: Arc<M>, multicall: Multicall<M>, config: V4AdapterConfig) -> Self {
        Self {
            provider,
            multicall,
            config,
        }
    }

    pub fn universal_router_address(&self) -> Address {
        self.config.universal_router
    }

    pub fn permit2_address(&self) -> Address {
        self.config.permit2
    }

    fn key_for_route(&self, route: &TradeRoute) -> Result<(V4PoolKey, bool), TradeError> {
        if route.path.len() != 2 || route.fee_tiers.len() != 1 {
            return Err(TradeError::InvalidInput(
                "V4 execution handles single-hop routes only".to_string(),
            ));
        }
        let pair = TokenPair::new(route.path[0].clone(), route.path[1].clone())?;
        let key = V4PoolKey::for_pair(&pair, route.fee_tiers[0]);
        let zero_for_one = route.input().v4_currency() == key.currency0;
        Ok((key, zero_for_one))
    }

    fn descriptor_key(&self, pool: &PoolDescriptor) -> V4PoolKey {
        V4PoolKey {
            currency0: pool.token0.v4_currency(),
            currency1: pool.token1.v4_currency(),
            fee_pips: pool.fee_tier.fee_pips(),
            tick_spacing: pool.fee_tier.tick_spacing(),
            hooks: Address::zero(),
        }
    }

    fn quote_error(&self, error: &ethers::contract::ContractError<M>) -> TradeError {
        if let Some(revert) = error.as_revert() {
            let reason = decode_revert_reason(revert)
                .unwrap_or_else(|| format!("0x{}", hex::encode(revert)));
            return TradeError::QuoteUnavailable {
                version: ProtocolVersion::V4.to_string(),
                reason,
            };
        }
        classify_provider_error(&error.to_string())
    }

    /// Shared tail of the quoter path. Quoter deployments that surface the
    /// simulated output as revert data still yield an exact quote; only the
    /// gas estimate is lost on that path.
    fn settle_quote(
        &self,
        pool: &PoolDescriptor,
        zero_for_one: bool,
        amount_in: U256,
        outcome: Result<(U256, U256), ethers::contract::ContractError<M>>,
    ) -> Result<PoolQuote, TradeError> {
        let (amount_out, gas_estimate) = match outcome {
            Ok((amount_out, gas_estimate)) => (amount_out, Some(gas_estimate)),
            Err(error) => match error.as_revert().and_then(|raw| decode_quote_revert(raw)) {
                Some(amount_out) => (amount_out, None),
                None => return Err(self.quote_error(&error)),
            },
        };

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
            gas_estimate,
            approximate: false,
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> ProtocolAdapter for UniswapV4Adapter<M> {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V4
    }

    async fn find_pool(
        &self,
        pair: &TokenPair,
        tiers: &[FeeTier],
    ) -> Result<Option<PoolDescriptor>, TradeError> {
        let keys: Vec<(FeeTier, V4PoolKey)> = tiers
            .iter()
            .map(|tier| (*tier, V4PoolKey::for_pair(pair, *tier)))
            .collect();

        // One round: slot0 + liquidity for every candidate key.
        let view = IStateView::new(Address::zero(), self.provider.clone());
        let mut calls = Vec::with_capacity(keys.len() * 2);
        for (_, key) in &keys {
            let id = v4_pool_id(key).to_fixed_bytes();
            let slot0_data = view
                .get_slot_0(id)
                .calldata()
                .ok_or_else(|| TradeError::Rpc("getSlot0 calldata was empty".to_string()))?;
            let liquidity_data = view
                .get_liquidity(id)
                .calldata()
                .ok_or_else(|| TradeError::Rpc("getLiquidity calldata was empty".to_string()))?;
            calls.push(Call {
                target: self.config.state_view,
                call_data: slot0_data,
            });
            calls.push(Call {
                target: self.config.state_view,
                call_data: liquidity_data,
            });
        }
        let results = self.multicall.run(calls, None).await?;

        let (token0, token1) = pair.v4_ordered();
        let mut pools: Vec<PoolDescriptor> = Vec::new();
        for (index, (tier, key)) in keys.iter().enumerate() {
            let slot0 = results[index * 2].as_deref();
            let liquidity_word = results[index * 2 + 1].as_deref();

            let (sqrt_price_x96, tick) = match slot0 {
                Some(raw) if raw.len() >= 64 => {
                    let sqrt = decode_uint_word(&raw[0..32]).unwrap_or_default();
                    let tick = decode_int24_word(&raw[32..64]).unwrap_or_default();
                    (sqrt, tick)
                }
                _ => {
                    warn!("getSlot0 failed for V4 pool at {} tier, skipping", tier);
                    continue;
                }
            };
            if validate_slot0(sqrt_price_x96, tick).is_err() {
                // All-zero slot: the pool was never initialized at this tier.
                debug!("V4 {} pool at {} tier is uninitialized", pair.describe(), tier);
                continue;
            }
            let liquidity = match liquidity_word
                .and_then(decode_uint_word)
                .and_then(|v| u128::try_from(v).ok())
            {
                Some(value) => value,
                None => {
                    warn!("getLiquidity failed for V4 pool at {} tier, skipping", tier);
                    continue;
                }
            };

            pools.push(PoolDescriptor {
                version: ProtocolVersion::V4,
                id: PoolId::Hash(v4_pool_id(key)),
                token0: token0.clone(),
                token1: token1.clone(),
                fee_tier: *tier,
                liquidity,
                sqrt_price_x96,
                tick,
            });
        }

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
            "V4 has {} initialized pool(s) for {} but none with liquidity",
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
        let amount_in_u128 = u128::try_from(amount_in).map_err(|_| {
            TradeError::InvalidInput("amount exceeds the uint128 range".to_string())
        })?;
        let key = self.descriptor_key(pool);
        let zero_for_one = pool.zero_for_one(input);

        let quoter = IV4Quoter::new(self.config.quoter, self.provider.clone());
        let call =
            quoter.quote_exact_input_single(quoter_params(&key, zero_for_one, amount_in_u128));
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
            version: ProtocolVersion::V4.to_string(),
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
        if route.version != ProtocolVersion::V4 {
            return Err(TradeError::InvalidInput(format!(
                "route targets {}, not Uniswap V4",
                route.version
            )));
        }
        let (key, zero_for_one) = self.key_for_route(route)?;

        let amount_in = u128::try_from(params.amount_in).map_err(|_| {
            TradeError::InvalidInput("amount exceeds the uint128 range".to_string())
        })?;
        let min_amount_out = u128::try_from(params.minimum_received).map_err(|_| {
            TradeError::InvalidInput("minimum received exceeds the uint128 range".to_string())
        })?;

        let commands = encode_v4_commands();
        let inputs = vec![encode_v4_swap_input(
            &key,
            zero_for_one,
            amount_in,
            min_amount_out,
        )];

        let router = IUniversalRouter::new(Address::zero(), self.provider.clone());
        let calldata = router
            .execute(commands, inputs, params.deadline)
            .calldata()
            .ok_or_else(|| TradeError::Rpc("execute calldata was empty".to_string()))?;

        let input = route.input();
        let value = if input.is_native {
            params.amount_in
        } else {
            U256::zero()
        };
        let approvals = if input.is_native {
            Vec::new()
        } else {
            vec![ApprovalNeed::Permit2 {
                token: input.address,
                permit2: self.config.permit2,
                spender: self.config.universal_router,
                amount: params.amount_in,
            }]
        };

        Ok(PreparedCall {
            to: self.config.universal_router,
            calldata,
            value,
            approvals,
        })
    }
}
