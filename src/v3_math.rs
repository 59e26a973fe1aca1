//! Concentrated-liquidity math shared by both protocol versions.
//!
//! V3 pools and V4 singleton pools run the same curve, so one module backs
//! local spot quotes, price impact numbers and fee accounting for both. The
//! on-chain quoters stay authoritative for amounts a caller will act on;
//! this math drives the approximate fallback path and post-quote checks.

use ethers::types::{Address, U256, U512};

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

/// sqrt(1.0001^-887272) * 2^96
pub const MIN_SQRT_RATIO: U256 = U256([4295128739, 0, 0, 0]);
/// sqrt(1.0001^887272) * 2^96
pub const MAX_SQRT_RATIO: U256 = U256([
    6743328256752651558,
    17280870778742802505,
    4294805859,
    0,
]);

/// 2^96. Limbs are little-endian 64-bit words.
pub const Q96: U256 = U256([0, 4294967296, 0, 0]);
/// 2^128, the scale of the fee growth accumulators.
pub const Q128: U256 = U256([0, 0, 1, 0]);

/// Fees are expressed in pips: hundredths of a basis point, 1e6 = 100%.
const FEE_DENOMINATOR: u32 = 1_000_000;

fn u512_saturating(value: U512) -> U256 {
    if value.0[4..].iter().any(|limb| *limb != 0) {
        U256::MAX
    } else {
        U256([value.0[0], value.0[1], value.0[2], value.0[3]])
    }
}

/// a * b / denominator with a 512-bit intermediate, so the product never
/// overflows. Zero denominator yields zero rather than panicking.
pub fn safe_mul_div(a: U256, b: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::zero();
    }
    let quotient = a.full_mul(b) / U512::from(denominator);
    u512_saturating(quotient)
}

fn mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::zero();
    }
    let product = a.full_mul(b);
    let denominator = U512::from(denominator);
    let mut quotient = product / denominator;
    if product % denominator != U512::zero() {
        quotient = quotient + U512::one();
    }
    u512_saturating(quotient)
}

fn div_rounding_up(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let quotient = a / b;
    if a % b != U256::zero() {
        quotient + U256::one()
    } else {
        quotient
    }
}

/// One exact-input step along the curve, the SwapMath.computeSwapStep
/// equivalent. The fee comes off the input before it moves the price.
///
/// Returns `(amount_in, amount_out, sqrt_ratio_next_x96, fee_amount)` where
/// `amount_in` excludes the fee.
pub fn compute_swap_step(
    sqrt_ratio_current_x96: U256,
    sqrt_ratio_target_x96: U256,
    liquidity: u128,
    amount_remaining: U256,
    fee_pips: u32,
) -> (U256, U256, U256, U256) {
    if liquidity == 0 {
        return (
            U256::zero(),
            U256::zero(),
            sqrt_ratio_current_x96,
            U256::zero(),
        );
    }

    let zero_for_one = sqrt_ratio_current_x96 >= sqrt_ratio_target_x96;
    let fee_pips = fee_pips.min(FEE_DENOMINATOR - 1);

    let amount_remaining_less_fee = safe_mul_div(
        amount_remaining,
        U256::from(FEE_DENOMINATOR - fee_pips),
        U256::from(FEE_DENOMINATOR),
    );

    let amount_in_to_target = if zero_for_one {
        get_amount0_delta(
            sqrt_ratio_target_x96,
            sqrt_ratio_current_x96,
            liquidity,
            true,
        )
    } else {
        get_amount1_delta(
            sqrt_ratio_current_x96,
            sqrt_ratio_target_x96,
            liquidity,
            true,
        )
    };

    let (sqrt_ratio_next_x96, amount_in) = if amount_remaining_less_fee >= amount_in_to_target {
        (sqrt_ratio_target_x96, amount_in_to_target)
    } else {
        let next = get_next_sqrt_price_from_input(
            sqrt_ratio_current_x96,
            liquidity,
            amount_remaining_less_fee,
            zero_for_one,
        );
        // Rounding must not carry the price past the target.
        let next = if zero_for_one {
            next.max(sqrt_ratio_target_x96)
        } else {
            next.min(sqrt_ratio_target_x96)
        };
        let used = if zero_for_one {
            get_amount0_delta(next, sqrt_ratio_current_x96, liquidity, true)
        } else {
            get_amount1_delta(sqrt_ratio_current_x96, next, liquidity, true)
        };
        (next, used.min(amount_remaining_less_fee))
    };

    let amount_out = if zero_for_one {
        get_amount1_delta(sqrt_ratio_next_x96, sqrt_ratio_current_x96, liquidity, false)
    } else {
        get_amount0_delta(sqrt_ratio_current_x96, sqrt_ratio_next_x96, liquidity, false)
    };

    let fee_amount = if sqrt_ratio_next_x96 != sqrt_ratio_target_x96 {
        // Input exhausted inside the range: whatever the curve did not
        // consume is the fee.
        amount_remaining.saturating_sub(amount_in)
    } else {
        mul_div_rounding_up(
            amount_in,
            U256::from(fee_pips),
            U256::from(FEE_DENOMINATOR - fee_pips),
        )
    };

    (amount_in, amount_out, sqrt_ratio_next_x96, fee_amount)
}

fn get_next_sqrt_price_from_input(
    sqrt_px96: U256,
    liquidity: u128,
    amount_in: U256,
    zero_for_one: bool,
) -> U256 {
    if amount_in.is_zero() || liquidity == 0 {
        return sqrt_px96;
    }
    let liquidity = U256::from(liquidity);

    if zero_for_one {
        // Price moves down: L*sqrtP*2^96 / (L*2^96 + amount*sqrtP), rounded up.
        let numerator1 = liquidity << 96;
        let denominator = U512::from(numerator1) + amount_in.full_mul(sqrt_px96);
        let product = numerator1.full_mul(sqrt_px96);
        let mut quotient = product / denominator;
        if product % denominator != U512::zero() {
            quotient = quotient + U512::one();
        }
        u512_saturating(quotient)
    } else {
        // Price moves up: sqrtP + amount*2^96 / L, rounded down.
        let quotient = safe_mul_div(amount_in, Q96, liquidity);
        sqrt_px96.saturating_add(quotient)
    }
}

fn get_amount0_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> U256 {
    let (lower, upper) = if sqrt_ratio_a_x96 > sqrt_ratio_b_x96 {
        (sqrt_ratio_b_x96, sqrt_ratio_a_x96)
    } else {
        (sqrt_ratio_a_x96, sqrt_ratio_b_x96)
    };
    if lower.is_zero() {
        return U256::zero();
    }

    let numerator1 = U256::from(liquidity) << 96;
    let numerator2 = upper - lower;

    if round_up {
        div_rounding_up(mul_div_rounding_up(numerator1, numerator2, upper), lower)
    } else {
        safe_mul_div(numerator1, numerator2, upper) / lower
    }
}

fn get_amount1_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> U256 {
    let (lower, upper) = if sqrt_ratio_a_x96 > sqrt_ratio_b_x96 {
        (sqrt_ratio_b_x96, sqrt_ratio_a_x96)
    } else {
        (sqrt_ratio_a_x96, sqrt_ratio_b_x96)
    };
    let diff = upper - lower;

    if round_up {
        mul_div_rounding_up(U256::from(liquidity), diff, Q96)
    } else {
        safe_mul_div(U256::from(liquidity), diff, Q96)
    }
}

/// Simulates an exact-input swap entirely locally and reports the price
/// impact it would cause. Returns `(amount_out, price_impact_pct, sqrt_price_after)`.
///
/// The swap runs against the pool's full range in one step, which matches
/// pools whose active liquidity does not change across initialized ticks.
/// Good enough for fallback quoting; never a substitute for the quoter.
pub fn simulate_swap_with_impact(
    amount_in: U256,
    sqrt_price_x96: U256,
    liquidity: u128,
    fee_pips: u32,
    zero_for_one: bool,
) -> Result<(U256, f64, U256), &'static str> {
    if amount_in.is_zero() {
        return Err("zero amount in");
    }
    if liquidity == 0 {
        return Err("zero liquidity");
    }
    if sqrt_price_x96.is_zero() {
        return Err("zero sqrt price");
    }

    let sqrt_ratio_target_x96 = if zero_for_one {
        MIN_SQRT_RATIO
    } else {
        MAX_SQRT_RATIO
    };

    let (_amount_in_used, amount_out, sqrt_price_after, _fee_amount) = compute_swap_step(
        sqrt_price_x96,
        sqrt_ratio_target_x96,
        liquidity,
        amount_in,
        fee_pips,
    );

    // Impact from the sqrt ratio change: price scales with the square of the
    // sqrt price, so |1 - (after/before)^2| is the relative move.
    let sqrt_before = u256_to_f64_lossy(sqrt_price_x96);
    let sqrt_after = u256_to_f64_lossy(sqrt_price_after);
    let price_impact = if sqrt_before > 0.0 {
        let ratio = sqrt_after / sqrt_before;
        ((1.0 - ratio * ratio).abs() * 100.0).clamp(0.0, 100.0)
    } else {
        100.0
    };

    Ok((amount_out, price_impact, sqrt_price_after))
}

// Lossy scientific conversion of U256 to f64 without intermediate u128 casts.
// Takes the first N digits as mantissa and uses the remaining as exponent base-10.
pub fn u256_to_f64_lossy(v: U256) -> f64 {
    if v.is_zero() {
        return 0.0;
    }
    let s = v.to_string();
    let len = s.len();
    let take = if len >= 18 { 18 } else { len };
    let (mantissa_str, _rest) = s.split_at(take);
    let mantissa = mantissa_str.parse::<f64>().unwrap_or(0.0);
    let exp10 = (len - take) as i32;
    mantissa * 10f64.powi(exp10)
}

/// Raw token1/token0 price from a sqrt price: (sqrtP / 2^96)^2.
pub fn sqrt_price_to_price(sqrt_price_x96: U256) -> f64 {
    if sqrt_price_x96.is_zero() {
        return 0.0;
    }
    let sqrt_price = u256_to_f64_lossy(sqrt_price_x96);
    let q96 = (1u128 << 96) as f64;
    (sqrt_price / q96).powi(2)
}

/// Human-unit pool price, token1 per token0, adjusted for decimals.
pub fn price_from_sqrt_x96(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> f64 {
    sqrt_price_to_price(sqrt_price_x96) * 10f64.powi(decimals0 as i32 - decimals1 as i32)
}

/// Price implied by a tick, token1 per token0 in raw units.
pub fn tick_to_price(tick: i32) -> f64 {
    let price = 1.0001f64.powi(tick);
    if price.is_finite() && price > 0.0 {
        price
    } else {
        ((tick as f64) * 1.0001f64.ln()).exp()
    }
}

/// Swap direction from the input token and the pool's token0.
pub fn is_zero_for_one(token_in: Address, token0: Address) -> bool {
    token_in == token0
}

fn wrapping_sub(a: U256, b: U256) -> U256 {
    a.overflowing_sub(b).0
}

/// Fee growth inside a tick range for one token. All arithmetic wraps mod
/// 2^256, matching the on-chain accumulators, so raw snapshot values can be
/// fed in directly.
pub fn fee_growth_inside(
    fee_growth_global_x128: U256,
    fee_growth_outside_lower_x128: U256,
    fee_growth_outside_upper_x128: U256,
    tick_lower: i32,
    tick_upper: i32,
    tick_current: i32,
) -> U256 {
    let below = if tick_current >= tick_lower {
        fee_growth_outside_lower_x128
    } else {
        wrapping_sub(fee_growth_global_x128, fee_growth_outside_lower_x128)
    };
    let above = if tick_current < tick_upper {
        fee_growth_outside_upper_x128
    } else {
        wrapping_sub(fee_growth_global_x128, fee_growth_outside_upper_x128)
    };
    wrapping_sub(wrapping_sub(fee_growth_global_x128, below), above)
}

/// Uncollected fees earned by a position since its last checkpoint:
/// liquidity * (growth_now - growth_last) / 2^128, with wrapping deltas.
pub fn tokens_owed(
    fee_growth_inside_now_x128: U256,
    fee_growth_inside_last_x128: U256,
    liquidity: u128,
) -> U256 {
    let delta = wrapping_sub(fee_growth_inside_now_x128, fee_growth_inside_last_x128);
    u512_saturating(delta.full_mul(U256::from(liquidity)) >> 128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_well_formed() {
        assert!(MIN_SQRT_RATIO < MAX_SQRT_RATIO);
        assert_eq!(Q96, U256::from(2).pow(U256::from(96)));
        assert_eq!(Q128, U256::from(2).pow(U256::from(128)));
    }

    #[test]
    fn test_swap_step_charges_fee_at_unit_price() {
        let amount_in = U256::exp10(18);
        let liquidity = 10_000_000_000_000_000_000_000u128; // deep pool, price stays ~1

        let (used, out, sqrt_after, fee) =
            compute_swap_step(Q96, MIN_SQRT_RATIO, liquidity, amount_in, 3000);

        assert!(out > U256::zero());
        assert!(out < amount_in); // fee plus impact
        assert!(used + fee <= amount_in);
        assert!(sqrt_after < Q96); // zero for one moves price down
        // 0.3% fee on ~1e18 input
        assert!(fee >= U256::from(2_900_000_000_000_000u128));
        assert!(fee <= U256::from(3_100_000_000_000_000u128));
    }

    #[test]
    fn test_higher_fee_tier_pays_less_out() {
        let amount_in = U256::exp10(18);
        let liquidity = 10_000_000_000_000_000_000_000u128;

        let (_, out_low, _, _) = compute_swap_step(Q96, MIN_SQRT_RATIO, liquidity, amount_in, 500);
        let (_, out_high, _, _) =
            compute_swap_step(Q96, MIN_SQRT_RATIO, liquidity, amount_in, 10000);
        assert!(out_low > out_high);
    }

    #[test]
    fn test_simulated_impact_grows_with_size() {
        let liquidity = 1_000_000_000_000_000_000_000u128;
        let small = simulate_swap_with_impact(U256::exp10(17), Q96, liquidity, 3000, true)
            .expect("small swap");
        let large = simulate_swap_with_impact(U256::exp10(19), Q96, liquidity, 3000, true)
            .expect("large swap");

        assert!(large.1 > small.1);
        assert!(small.1 >= 0.0 && large.1 <= 100.0);
        assert!(large.2 < small.2); // bigger sell pushes sqrt price further down
    }

    #[test]
    fn test_simulate_rejects_empty_pool() {
        assert!(simulate_swap_with_impact(U256::exp10(18), Q96, 0, 3000, true).is_err());
        assert!(simulate_swap_with_impact(U256::zero(), Q96, 1, 3000, true).is_err());
    }

    #[test]
    fn test_price_conversions() {
        assert!((sqrt_price_to_price(Q96) - 1.0).abs() < 1e-9);
        // 1:1 raw price between a 6-decimal and an 18-decimal token
        let human = price_from_sqrt_x96(Q96, 6, 18);
        assert!((human - 1e-12).abs() < 1e-21);
        assert!((tick_to_price(0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fee_growth_inside_wraps() {
        let global = U256::from(100);
        // Outside snapshots larger than global force the wrap-around path.
        let inside = fee_growth_inside(global, U256::from(30), U256::from(200), -60, 60, 0);
        let expected = wrapping_sub(wrapping_sub(global, U256::from(30)), U256::from(200));
        assert_eq!(inside, expected);
    }

    #[test]
    fn test_tokens_owed_scales_by_liquidity() {
        let last = U256::from(7) << 128;
        let now = U256::from(10) << 128;
        assert_eq!(tokens_owed(now, last, 5), U256::from(15));
        // Checkpoints taken across an accumulator wrap still produce the
        // small positive delta.
        let pre_wrap = U256::MAX - (U256::one() << 128) + 1;
        let post_wrap = U256::from(2) << 128;
        assert_eq!(tokens_owed(post_wrap, pre_wrap, 1), U256::from(3));
    }
}
