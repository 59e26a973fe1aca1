//! Quote assembly: slippage floors, display rounding, decimal amount
//! parsing, and the math that turns a raw pool quote into a [`TradeRoute`].

use chrono::Utc;
use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::TradeError;
use crate::pools::{PoolDescriptor, TradeDirection};
use crate::protocol::{PoolQuote, TradeRoute};
use crate::tokens::Token;
use crate::v3_math::{safe_mul_div, u256_to_f64_lossy};

pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;
pub const DEFAULT_DEADLINE_SECS: u64 = 20 * 60;
pub const BPS_DENOMINATOR: u32 = 10_000;
/// Display precision for prices and amounts.
pub const DISPLAY_SIG_DIGITS: u32 = 6;

/// Slippage floor: `amount_out * (10000 - bps) / 10000`, rounded down.
/// By construction the result never exceeds `amount_out`.
pub fn min_received(amount_out: U256, slippage_bps: u32) -> Result<U256, TradeError> {
    if slippage_bps > BPS_DENOMINATOR {
        return Err(TradeError::InvalidInput(format!(
            "slippage of {slippage_bps} bps exceeds 100%"
        )));
    }
    let kept = U256::from(BPS_DENOMINATOR - slippage_bps);
    Ok(safe_mul_div(amount_out, kept, U256::from(BPS_DENOMINATOR)))
}

/// Rounds to `digits` significant digits for display.
pub fn round_significant(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor();
    let factor = 10f64.powf(digits as f64 - 1.0 - magnitude);
    (value * factor).round() / factor
}

/// Lossy conversion to display units. Fine for prices and logs, never for
/// on-chain amounts.
pub fn to_human(amount: U256, decimals: u8) -> f64 {
    u256_to_f64_lossy(amount) / 10f64.powi(decimals as i32)
}

/// Exact decimal rendering of a raw amount, trailing zeros trimmed.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    let raw = amount.to_string();
    if decimals == 0 {
        return raw;
    }
    let width = decimals as usize;
    let padded = if raw.len() <= width {
        format!("{}{raw}", "0".repeat(width - raw.len() + 1))
    } else {
        raw
    };
    let (integral, fraction) = padded.split_at(padded.len() - width);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integral.to_string()
    } else {
        format!("{integral}.{fraction}")
    }
}

/// Syntactic pre-check for an amount string, usable before the token's
/// decimals are known. Anything passing this can still fail `parse_amount`
/// on precision grounds.
pub fn validate_amount_text(text: &str) -> Result<(), TradeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TradeError::InvalidInput("amount is empty".to_string()));
    }
    let value = Decimal::from_str(trimmed)
        .map_err(|_| TradeError::InvalidInput(format!("'{trimmed}' is not a valid amount")))?;
    if value <= Decimal::ZERO {
        return Err(TradeError::InvalidInput(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Parses a user-entered decimal amount into raw token units.
///
/// Rejects anything that is not a plain positive decimal number, more
/// fractional digits than the token supports, and amounts too large to
/// scale exactly.
pub fn parse_amount(text: &str, decimals: u8) -> Result<U256, TradeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TradeError::InvalidInput("amount is empty".to_string()));
    }
    if decimals > 28 {
        return Err(TradeError::InvalidInput(format!(
            "tokens with {decimals} decimal places are not supported"
        )));
    }

    let value = Decimal::from_str(trimmed)
        .map_err(|_| TradeError::InvalidInput(format!("'{trimmed}' is not a valid amount")))?;
    if value <= Decimal::ZERO {
        return Err(TradeError::InvalidInput(
            "amount must be greater than zero".to_string(),
        ));
    }

    let factor = Decimal::from_i128_with_scale(10i128.pow(decimals as u32), 0);
    let scaled = value
        .checked_mul(factor)
        .ok_or_else(|| TradeError::InvalidInput(format!("'{trimmed}' is too large")))?
        .normalize();
    if scaled.fract() != Decimal::ZERO {
        return Err(TradeError::InvalidInput(format!(
            "'{trimmed}' has more than {decimals} decimal places"
        )));
    }

    U256::from_dec_str(&scaled.to_string())
        .map_err(|_| TradeError::InvalidInput(format!("'{trimmed}' is too large")))
}

/// Display execution price. Buys (native in) report output per unit of
/// input; sells report input per unit of output. Both read as token per
/// native unit.
pub fn execution_price(
    direction: TradeDirection,
    amount_in: U256,
    in_decimals: u8,
    amount_out: U256,
    out_decimals: u8,
) -> f64 {
    let human_in = to_human(amount_in, in_decimals);
    let human_out = to_human(amount_out, out_decimals);
    if human_in <= 0.0 || human_out <= 0.0 {
        return 0.0;
    }
    let ratio = match direction {
        TradeDirection::Buy => human_out / human_in,
        TradeDirection::Sell => human_in / human_out,
    };
    round_significant(ratio, DISPLAY_SIG_DIGITS)
}

/// Percentage drop of the effective price against the pre-trade mid price,
/// clamped to [0, 100]. Both prices are in output-per-input units.
pub fn price_impact_pct(mid_price: f64, effective_price: f64) -> f64 {
    if !mid_price.is_finite() || mid_price <= 0.0 || !effective_price.is_finite() {
        return 0.0;
    }
    ((1.0 - effective_price / mid_price) * 100.0).clamp(0.0, 100.0)
}

/// Combines a pool, a raw quote and the slippage setting into the unified
/// route shape callers consume.
pub fn assemble_route(
    pool: &PoolDescriptor,
    input: &Token,
    output: &Token,
    direction: TradeDirection,
    amount_in: U256,
    quote: &PoolQuote,
    slippage_bps: u32,
) -> Result<TradeRoute, TradeError> {
    let minimum_received = min_received(quote.amount_out, slippage_bps)?;

    let effective = to_human(quote.amount_out, output.decimals)
        / to_human(amount_in, input.decimals).max(f64::MIN_POSITIVE);
    let impact = price_impact_pct(pool.mid_price(input), effective);

    Ok(TradeRoute {
        version: pool.version,
        direction,
        path: vec![input.clone(), output.clone()],
        fee_tiers: vec![pool.fee_tier],
        amount_in,
        amount_out: quote.amount_out,
        minimum_received,
        execution_price: execution_price(
            direction,
            amount_in,
            input.decimals,
            quote.amount_out,
            output.decimals,
        ),
        price_impact_pct: impact,
        slippage_bps,
        approximate: quote.approximate,
        quoted_at: Utc::now(),
    })
}
