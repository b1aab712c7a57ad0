use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};
use crate::models::quote::{PriceSet, QuoteBasis};

/// Parse a chain decimal string. Digits beyond the decimal type's 28-digit
/// scale are rounded away; scientific notation is accepted.
pub fn parse_decimal(raw: &str, what: &str) -> EngineResult<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidInput(format!("{what} is empty")));
    }

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| EngineError::InvalidInput(format!("invalid {what} {trimmed:?}: {e}")))
}

/// Parse a chain decimal string without losing any digit.
fn parse_exact(raw: &str, what: &str) -> EngineResult<BigDecimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidInput(format!("{what} is empty")));
    }

    BigDecimal::from_str(trimmed)
        .map_err(|e| EngineError::InvalidInput(format!("invalid {what} {trimmed:?}: {e}")))
}

fn checked_div(numerator: BigDecimal, denominator: &BigDecimal, what: &str) -> EngineResult<BigDecimal> {
    if denominator.is_zero() {
        return Err(EngineError::InvalidInput(format!("{what} divides by zero")));
    }
    Ok(numerator / denominator)
}

/// Convert an exact intermediate to f64.
///
/// Rounding to the nearest double is accepted; anything that cannot land on a
/// finite, normal double is reported as precision loss.
pub fn to_f64_checked(value: &BigDecimal, what: &str) -> EngineResult<f64> {
    let converted: f64 = value
        .to_string()
        .parse()
        .map_err(|e| EngineError::PrecisionLoss(format!("{what} {value} has no f64 form: {e}")))?;

    if !converted.is_finite() {
        return Err(EngineError::PrecisionLoss(format!("{what} {value} is not finite as f64")));
    }
    if !value.is_zero() && !converted.is_normal() {
        return Err(EngineError::PrecisionLoss(format!("{what} {value} underflows f64")));
    }
    Ok(converted)
}

/// Round an exact intermediate to the decimal type used for tick work.
fn to_decimal_checked(value: &BigDecimal, what: &str) -> EngineResult<Decimal> {
    let out_of_range = || EngineError::PrecisionLoss(format!("{what} {value} exceeds decimal range"));

    let mut rounded = value.with_prec(28);
    let (_, scale) = rounded.as_bigint_and_exponent();
    if scale > 28 {
        rounded = value.with_scale_round(28, RoundingMode::HalfEven);
    } else if scale < 0 {
        rounded = rounded.with_scale(0);
    }

    let (digits, scale) = rounded.as_bigint_and_exponent();
    let mantissa = digits.to_i128().ok_or_else(out_of_range)?;
    Decimal::try_from_i128_with_scale(mantissa, scale as u32).map_err(|_| out_of_range())
}

fn exact_mark_price(
    base_price: &str,
    power_price: &str,
    normalization_factor: &str,
    scale_factor: u64,
) -> EngineResult<BigDecimal> {
    let base = parse_exact(base_price, "base price")?;
    let power = parse_exact(power_price, "power price")?;
    let norm = parse_exact(normalization_factor, "normalization factor")?;

    let ratio = checked_div(base, &power, "mark price")?;
    let normalized = checked_div(ratio, &norm, "mark price")?;
    Ok(normalized * BigDecimal::from(scale_factor))
}

fn exact_target_price(
    base_price: &str,
    normalization_factor: &str,
    scale_factor: u64,
) -> EngineResult<BigDecimal> {
    let base = parse_exact(base_price, "base price")?;
    let norm = parse_exact(normalization_factor, "normalization factor")?;

    // Products are exact; only the final division rounds, at 100 digits.
    let numerator = &base * BigDecimal::from(scale_factor);
    let denominator = &base * &base * &norm;
    checked_div(numerator, &denominator, "target price")
}

/// `(base / power / normalization) * scale`, rounded to 28 digits.
pub fn mark_price_decimal(
    base_price: &str,
    power_price: &str,
    normalization_factor: &str,
    scale_factor: u64,
) -> EngineResult<Decimal> {
    let mark = exact_mark_price(base_price, power_price, normalization_factor, scale_factor)?;
    to_decimal_checked(&mark, "mark price")
}

pub fn calculate_mark_price(
    base_price: &str,
    power_price: &str,
    normalization_factor: &str,
    scale_factor: u64,
) -> EngineResult<f64> {
    let mark = exact_mark_price(base_price, power_price, normalization_factor, scale_factor)?;
    to_f64_checked(&mark, "mark price")
}

/// `(base * scale) / (base^2 * normalization)`, rounded to 28 digits.
pub fn target_price_decimal(
    base_price: &str,
    normalization_factor: &str,
    scale_factor: u64,
) -> EngineResult<Decimal> {
    let target = exact_target_price(base_price, normalization_factor, scale_factor)?;
    to_decimal_checked(&target, "target price")
}

pub fn calculate_target_price(
    base_price: &str,
    normalization_factor: &str,
    scale_factor: u64,
) -> EngineResult<f64> {
    let target = exact_target_price(base_price, normalization_factor, scale_factor)?;
    to_f64_checked(&target, "target price")
}

/// Index price is the square of the base spot price.
pub fn calculate_index_price(base_spot_price: &str) -> EngineResult<f64> {
    let spot: f64 = base_spot_price.trim().parse().map_err(|e| {
        EngineError::InvalidInput(format!("invalid base price {base_spot_price:?}: {e}"))
    })?;
    Ok(spot * spot)
}

pub fn calculate_premium(mark_price: f64, index_price: f64) -> f64 {
    if index_price == 0.0 {
        return 0.0;
    }
    (mark_price - index_price) / index_price
}

/// Derive mark, index, target and premium for one cycle.
pub fn derive_quote_basis(
    prices: &PriceSet,
    normalization_factor: &str,
    index_scale: u64,
) -> EngineResult<QuoteBasis> {
    let mark_price = calculate_mark_price(
        &prices.base_spot_price,
        &prices.power_spot_price,
        normalization_factor,
        index_scale,
    )?;
    let index_price = calculate_index_price(&prices.base_spot_price)?;
    let target_price =
        calculate_target_price(&prices.base_spot_price, normalization_factor, index_scale)?;

    Ok(QuoteBasis {
        mark_price,
        index_price,
        target_price,
        premium: calculate_premium(mark_price, index_price),
    })
}
