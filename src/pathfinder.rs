//! Multi-hop route search over the V3 pool graph.
//!
//! Direct pools across every fee tier come first, then two-hop paths
//! through a small set of well-connected intermediate tokens. Every
//! candidate is priced through the on-chain quoter and scored with a
//! weighted formula; pricing failures drop the candidate, never the search.

use std::sync::Arc;

use ethers::prelude::Middleware;
use ethers::types::U256;
use futures::future::join_all;
use log::{debug, warn};

use crate::adapters::UniswapV3Adapter;
use crate::errors::TradeError;
use crate::pools::{FeeTier, PoolDescriptor, TokenPair, TradeDirection};
use crate::protocol::TradeRoute;
use crate::quote::{execution_price, min_received, price_impact_pct, to_human};
use crate::tokens::Token;
use chrono::Utc;

/// Relative importance of the three scoring terms. These are heuristics
/// carried as configuration so they can be recalibrated against observed
/// gas and slippage data.
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub output: f64,
    pub impact: f64,
    pub gas: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            output: 0.7,
            impact: 0.2,
            gas: 0.1,
        }
    }
}

/// Fixed base-plus-per-hop gas model. Deliberately not a live estimate;
/// the scoring only needs relative cost between candidates.
#[derive(Debug, Clone, Copy)]
pub struct GasModel {
    pub base_gas: u64,
    pub per_hop_gas: u64,
    pub gas_price_gwei: f64,
}

impl Default for GasModel {
    fn default() -> Self {
        Self {
            base_gas: 150_000,
            per_hop_gas: 80_000,
            gas_price_gwei: 30.0,
        }
    }
}

impl GasModel {
    /// Estimated cost of an n-hop swap in native-currency units.
    pub fn cost_native(&self, hops: usize) -> f64 {
        let total_gas = self.base_gas + self.per_hop_gas * hops as u64;
        total_gas as f64 * self.gas_price_gwei * 1e-9
    }
}

/// One priced path through the pool graph.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub path: Vec<Token>,
    pub fee_tiers: Vec<FeeTier>,
    pub amount_in: U256,
    pub amount_out: U256,
    pub price_impact_pct: f64,
    pub gas_cost_native: f64,
    pub score: f64,
}

impl RouteCandidate {
    pub fn hops(&self) -> usize {
        self.fee_tiers.len()
    }

    pub fn describe(&self) -> String {
        let legs: Vec<&str> = self.path.iter().map(|t| t.symbol.as_str()).collect();
        format!(
            "{} [{}] score {:.6}",
            legs.join(" -> "),
            self.fee_tiers
                .iter()
                .map(|t| t.label())
                .collect::<Vec<_>>()
                .join("+"),
            self.score
        )
    }
}

/// score = w_out * output - w_impact * impact - w_gas * gasCost.
pub fn score_candidate(
    weights: &ScoringWeights,
    human_out: f64,
    impact_pct: f64,
    gas_cost_native: f64,
) -> f64 {
    weights.output * human_out - weights.impact * impact_pct - weights.gas * gas_cost_native
}

/// Highest score wins; equal scores keep the earliest candidate, so the
/// enumeration order is the tie-break.
pub fn select_best(candidates: &[RouteCandidate]) -> Option<&RouteCandidate> {
    let mut best: Option<&RouteCandidate> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.score <= current.score => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Every liquid tier pairing between two legs.
fn tier_combinations(
    leg_a: &[PoolDescriptor],
    leg_b: &[PoolDescriptor],
) -> Vec<(FeeTier, FeeTier)> {
    let mut combos = Vec::with_capacity(leg_a.len() * leg_b.len());
    for a in leg_a.iter().filter(|p| p.is_liquid(0)) {
        for b in leg_b.iter().filter(|p| p.is_liquid(0)) {
            combos.push((a.fee_tier, b.fee_tier));
        }
    }
    combos
}

/// An unpriced path plus the pre-trade mid price used for impact later.
struct UnpricedCandidate {
    path: Vec<Token>,
    fee_tiers: Vec<FeeTier>,
    mid_price: f64,
}

pub struct PathFinder<M: Middleware> {
    v3: Arc<UniswapV3Adapter<M>>,
    intermediates: Vec<Token>,
    weights: ScoringWeights,
    gas_model: GasModel,
}

impl<M: Middleware + 'static> PathFinder<M> {
    pub fn new(
        v3: Arc<UniswapV3Adapter<M>>,
        intermediates: Vec<Token>,
        weights: ScoringWeights,
        gas_model: GasModel,
    ) -> Self {
        Self {
            v3,
            intermediates,
            weights,
            gas_model,
        }
    }

    /// Enumerates and prices all direct and (optionally) two-hop routes.
    /// Candidates that fail to price are skipped.
    pub async fn find_all_routes(
        &self,
        token_in: &Token,
        token_out: &Token,
        amount_in: U256,
        max_hops: usize,
    ) -> Result<Vec<RouteCandidate>, TradeError> {
        let pair = TokenPair::new(token_in.clone(), token_out.clone())?;
        let mut unpriced: Vec<UnpricedCandidate> = Vec::new();

        let direct_pools = self.v3.pools_for_pair(&pair, &FeeTier::ALL).await?;
        for pool in direct_pools.iter().filter(|p| p.is_liquid(0)) {
            unpriced.push(UnpricedCandidate {
                path: vec![token_in.clone(), token_out.clone()],
                fee_tiers: vec![pool.fee_tier],
                mid_price: pool.mid_price(token_in),
            });
        }

        if max_hops > 1 {
            for via in &self.intermediates {
                if via == token_in || via == token_out {
                    continue;
                }
                let leg_a = match TokenPair::new(token_in.clone(), via.clone()) {
                    Ok(pair) => self.v3.pools_for_pair(&pair, &FeeTier::ALL).await?,
                    Err(_) => continue,
                };
                let leg_b = match TokenPair::new(via.clone(), token_out.clone()) {
                    Ok(pair) => self.v3.pools_for_pair(&pair, &FeeTier::ALL).await?,
                    Err(_) => continue,
                };

                for (tier_a, tier_b) in tier_combinations(&leg_a, &leg_b) {
                    let mid_a = leg_a
                        .iter()
                        .find(|p| p.fee_tier == tier_a)
                        .map(|p| p.mid_price(token_in))
                        .unwrap_or(0.0);
                    let mid_b = leg_b
                        .iter()
                        .find(|p| p.fee_tier == tier_b)
                        .map(|p| p.mid_price(via))
                        .unwrap_or(0.0);
                    unpriced.push(UnpricedCandidate {
                        path: vec![token_in.clone(), via.clone(), token_out.clone()],
                        fee_tiers: vec![tier_a, tier_b],
                        mid_price: mid_a * mid_b,
                    });
                }
            }
        }

        debug!(
            "Pricing {} candidate route(s) for {} -> {}",
            unpriced.len(),
            token_in.symbol,
            token_out.symbol
        );

        let quotes = join_all(unpriced.iter().map(|candidate| {
            self.v3
                .quote_path(&candidate.path, &candidate.fee_tiers, amount_in)
        }))
        .await;

        let human_in = to_human(amount_in, token_in.decimals).max(f64::MIN_POSITIVE);
        let mut candidates = Vec::new();
        for (candidate, quoted) in unpriced.into_iter().zip(quotes) {
            let amount_out = match quoted {
                Ok(amount) if amount > U256::zero() => amount,
                Ok(_) => continue,
                Err(error) => {
                    warn!("candidate pricing failed, skipping: {error}");
                    continue;
                }
            };
            let human_out = to_human(amount_out, token_out.decimals);
            let impact = price_impact_pct(candidate.mid_price, human_out / human_in);
            let gas_cost = self.gas_model.cost_native(candidate.fee_tiers.len());

            candidates.push(RouteCandidate {
                path: candidate.path,
                fee_tiers: candidate.fee_tiers,
                amount_in,
                amount_out,
                price_impact_pct: impact,
                gas_cost_native: gas_cost,
                score: score_candidate(&self.weights, human_out, impact, gas_cost),
            });
        }
        Ok(candidates)
    }

    /// Prices the search and returns the winner as an executable route.
    pub async fn best_route(
        &self,
        token_in: &Token,
        token_out: &Token,
        amount_in: U256,
        max_hops: usize,
        direction: TradeDirection,
        slippage_bps: u32,
    ) -> Result<Option<TradeRoute>, TradeError> {
        let candidates = self
            .find_all_routes(token_in, token_out, amount_in, max_hops)
            .await?;
        let Some(best) = select_best(&candidates) else {
            return Ok(None);
        };
        debug!("Best route: {}", best.describe());

        Ok(Some(TradeRoute {
            version: crate::pools::ProtocolVersion::V3,
            direction,
            path: best.path.clone(),
            fee_tiers: best.fee_tiers.clone(),
            amount_in,
            amount_out: best.amount_out,
            minimum_received: min_received(best.amount_out, slippage_bps)?,
            execution_price: execution_price(
                direction,
                amount_in,
                token_in.decimals,
                best.amount_out,
                token_out.decimals,
            ),
            price_impact_pct: best.price_impact_pct,
            slippage_bps,
            approximate: false,
            quoted_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::{PoolId, ProtocolVersion};
    use crate::v3_math::Q96;
    use ethers::types::Address;
    use itertools::iproduct;

    fn token(byte: u8, symbol: &str) -> Token {
        Token::erc20(
            1,
            Address::from_low_u64_be(byte as u64),
            18,
            symbol,
            symbol,
        )
    }

    fn candidate(symbols: &[&str], tiers: Vec<FeeTier>, score: f64) -> RouteCandidate {
        RouteCandidate {
            path: symbols
                .iter()
                .enumerate()
                .map(|(i, s)| token(i as u8 + 1, s))
                .collect(),
            fee_tiers: tiers,
            amount_in: U256::exp10(18),
            amount_out: U256::exp10(18),
            price_impact_pct: 0.0,
            gas_cost_native: 0.0,
            score,
        }
    }

    fn pool_at(tier: FeeTier, liquidity: u128) -> PoolDescriptor {
        PoolDescriptor {
            version: ProtocolVersion::V3,
            id: PoolId::Address(Address::from_low_u64_be(99)),
            token0: token(1, "A"),
            token1: token(2, "B"),
            fee_tier: tier,
            liquidity,
            sqrt_price_x96: Q96,
            tick: 0,
        }
    }

    #[test]
    fn test_score_formula() {
        let weights = ScoringWeights::default();
        let score = score_candidate(&weights, 100.0, 2.0, 0.01);
        assert!((score - (0.7 * 100.0 - 0.2 * 2.0 - 0.1 * 0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_impact_penalty_can_flip_ranking() {
        let weights = ScoringWeights::default();
        // Slightly more output, but paid for with heavy impact.
        let greedy = score_candidate(&weights, 101.0, 20.0, 0.0);
        let careful = score_candidate(&weights, 100.0, 1.0, 0.0);
        assert!(careful > greedy);

        // With the impact term switched off the extra output wins.
        let blind = ScoringWeights {
            impact: 0.0,
            ..weights
        };
        assert!(score_candidate(&blind, 101.0, 20.0, 0.0) > score_candidate(&blind, 100.0, 1.0, 0.0));
    }

    #[test]
    fn test_select_best_keeps_first_on_tie() {
        let a = candidate(&["A", "B"], vec![FeeTier::Medium], 5.0);
        let b = candidate(&["A", "C", "B"], vec![FeeTier::Low, FeeTier::Low], 5.0);
        let c = candidate(&["A", "D", "B"], vec![FeeTier::High, FeeTier::Low], 4.0);

        let list = vec![a, b, c];
        let best = select_best(&list).unwrap();
        assert_eq!(best.path.len(), 2, "tie must keep the first-enumerated route");

        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn test_gas_model_charges_per_hop() {
        let model = GasModel::default();
        let one = model.cost_native(1);
        let two = model.cost_native(2);
        let expected_delta = model.per_hop_gas as f64 * model.gas_price_gwei * 1e-9;
        assert!((two - one - expected_delta).abs() < 1e-15);
        assert!(one > 0.0);
    }

    #[test]
    fn test_tier_combinations_cross_product_of_liquid_pools() {
        let leg_a = vec![
            pool_at(FeeTier::Medium, 1_000),
            pool_at(FeeTier::Low, 1_000),
            pool_at(FeeTier::High, 0), // empty, must be excluded
        ];
        let leg_b = vec![pool_at(FeeTier::Lowest, 500)];

        let combos = tier_combinations(&leg_a, &leg_b);
        let expected: Vec<(FeeTier, FeeTier)> =
            iproduct!([FeeTier::Medium, FeeTier::Low], [FeeTier::Lowest]).collect();
        assert_eq!(combos, expected);
    }
}
