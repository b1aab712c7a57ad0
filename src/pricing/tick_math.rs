//! Price/tick conversion on the venue's geometric tick grid.
//!
//! Each power of ten in price spans `GEOMETRIC_EXPONENT_INCREMENT_DISTANCE`
//! ticks. Within the bucket `[10^k, 10^(k+1))` every tick adds
//! `10^(k + EXPONENT_AT_PRICE_ONE)` to the price, so tick 0 is price 1,
//! tick 9_000_000 is price 10 and tick -9_000_000 is price 0.1.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::quote::{BuySellTicks, TickRange};

pub const TICK_SPACING: i64 = 100;
pub const EXPONENT_AT_PRICE_ONE: i32 = -6;
pub const GEOMETRIC_EXPONENT_INCREMENT_DISTANCE: i64 = 9_000_000;

/// Smallest price the grid resolves (tick -108_000_000).
pub const MIN_SPOT_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 12);
/// Largest price the decimal type can bucket: 10^28.
pub const MAX_SPOT_PRICE: Decimal =
    Decimal::from_parts(0x1000_0000, 0x3E25_0261, 0x204F_CE5E, false, 0);

const MIN_EXPONENT: i32 = -12;
const MAX_EXPONENT: i32 = 27;

fn pow10(exponent: i32) -> Decimal {
    if exponent >= 0 {
        Decimal::from_i128_with_scale(10i128.pow(exponent as u32), 0)
    } else {
        Decimal::new(1, exponent.unsigned_abs())
    }
}

fn conversion_error(price: Decimal, reason: &'static str) -> EngineError {
    EngineError::TickConversion {
        price: price.to_string(),
        reason,
    }
}

/// Map a price to its tick, truncating within the bucket.
pub fn price_to_tick(price: Decimal) -> EngineResult<i64> {
    if price <= Decimal::ZERO {
        return Err(conversion_error(price, "price must be positive"));
    }
    if price < MIN_SPOT_PRICE {
        return Err(conversion_error(price, "price below minimum spot price"));
    }
    if price > MAX_SPOT_PRICE {
        return Err(conversion_error(price, "price above maximum spot price"));
    }
    if price == Decimal::ONE {
        return Ok(0);
    }

    // Find the power-of-ten bucket holding the price.
    let mut exponent: i32 = if price > Decimal::ONE { 0 } else { -1 };
    if price > Decimal::ONE {
        while exponent < MAX_EXPONENT && pow10(exponent + 1) < price {
            exponent += 1;
        }
    } else {
        while exponent > MIN_EXPONENT && pow10(exponent) > price {
            exponent -= 1;
        }
    }

    let initial_price = pow10(exponent);
    let increment = pow10(exponent + EXPONENT_AT_PRICE_ONE);

    let ticks_filled = ((price - initial_price) / increment)
        .trunc()
        .to_i64()
        .ok_or_else(|| conversion_error(price, "tick index out of range"))?;

    Ok(GEOMETRIC_EXPONENT_INCREMENT_DISTANCE * i64::from(exponent) + ticks_filled)
}

/// Round toward negative infinity onto a multiple of `spacing`.
pub fn round_down_to_spacing(tick: i64, spacing: i64) -> EngineResult<i64> {
    if spacing <= 0 {
        return Err(EngineError::Rounding { tick, spacing });
    }
    tick.checked_sub(tick.rem_euclid(spacing))
        .ok_or(EngineError::Rounding { tick, spacing })
}

fn price_to_spaced_tick(price: Decimal, spacing: i64) -> EngineResult<i64> {
    round_down_to_spacing(price_to_tick(price)?, spacing)
}

/// Ticks for the buy price, its lower bound `buy * (1 - spread)`, the sell
/// price and its upper bound `sell * (1 + spread)`. Always rounds down.
pub fn calculate_buy_sell_ticks(
    buy_price: Decimal,
    sell_price: Decimal,
    spread: Decimal,
    spacing: i64,
) -> EngineResult<BuySellTicks> {
    let buy_lower_bound = buy_price
        .checked_mul(Decimal::ONE - spread)
        .ok_or_else(|| conversion_error(buy_price, "buy lower bound overflows"))?;
    let sell_upper_bound = sell_price
        .checked_mul(Decimal::ONE + spread)
        .ok_or_else(|| conversion_error(sell_price, "sell upper bound overflows"))?;

    let ticks = BuySellTicks {
        buy_tick: price_to_spaced_tick(buy_price, spacing)?,
        buy_lower_tick: price_to_spaced_tick(buy_lower_bound, spacing)?,
        sell_tick: price_to_spaced_tick(sell_price, spacing)?,
        sell_upper_tick: price_to_spaced_tick(sell_upper_bound, spacing)?,
    };

    debug!(
        %buy_price, %buy_lower_bound, %sell_price, %sell_upper_bound,
        buy_tick = ticks.buy_tick,
        buy_lower_tick = ticks.buy_lower_tick,
        sell_tick = ticks.sell_tick,
        sell_upper_tick = ticks.sell_upper_tick,
        "calculated buy/sell ticks"
    );

    Ok(ticks)
}

/// Keep a side's range from straddling the live tick.
///
/// A straddled buy range is capped one spacing below the current tick, a
/// straddled sell range starts one spacing above it. After re-rounding, a
/// lower bound closer than one spacing to the current tick is moved up by
/// three spacings.
pub fn adjust_for_current_tick(
    is_buy_side: bool,
    current_tick: i64,
    lower_tick: i64,
    upper_tick: i64,
    spacing: i64,
) -> EngineResult<(i64, i64)> {
    let overflow = || EngineError::Rounding {
        tick: current_tick,
        spacing,
    };

    let mut lower = lower_tick;
    let mut upper = upper_tick;

    if lower <= current_tick && current_tick <= upper {
        if is_buy_side {
            upper = current_tick.checked_sub(spacing).ok_or_else(overflow)?;
        } else {
            lower = current_tick.checked_add(spacing).ok_or_else(overflow)?;
        }
    }

    let upper = round_down_to_spacing(upper, spacing)?;
    let mut lower = round_down_to_spacing(lower, spacing)?;

    let lower_delta = current_tick
        .checked_sub(lower)
        .map(i64::unsigned_abs)
        .ok_or_else(overflow)?;
    if lower_delta < spacing.unsigned_abs() {
        lower = spacing
            .checked_mul(3)
            .and_then(|buffer| lower.checked_add(buffer))
            .ok_or_else(overflow)?;
    }

    Ok((lower, upper))
}

/// Apply [`adjust_for_current_tick`] to one side's range.
pub fn adjust_range(
    is_buy_side: bool,
    current_tick: i64,
    range: TickRange,
    spacing: i64,
) -> EngineResult<TickRange> {
    let (lower_tick, upper_tick) = adjust_for_current_tick(
        is_buy_side,
        current_tick,
        range.lower_tick,
        range.upper_tick,
        spacing,
    )?;
    Ok(TickRange {
        lower_tick,
        upper_tick,
        ..range
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_to_tick_reference_points() {
        assert_eq!(price_to_tick(dec!(1)).unwrap(), 0);
        assert_eq!(price_to_tick(dec!(10)).unwrap(), 9_000_000);
        assert_eq!(price_to_tick(dec!(0.1)).unwrap(), -9_000_000);
        assert_eq!(price_to_tick(dec!(1.1)).unwrap(), 100_000);
        assert_eq!(price_to_tick(dec!(0.9)).unwrap(), -1_000_000);
        assert_eq!(price_to_tick(dec!(4)).unwrap(), 3_000_000);
        assert_eq!(price_to_tick(dec!(0.000001)).unwrap(), -54_000_000);
    }

    #[test]
    fn test_price_to_tick_truncates_within_bucket() {
        // 1.0000015 sits between tick 1 and tick 2.
        assert_eq!(price_to_tick(dec!(1.0000015)).unwrap(), 1);
    }

    #[test]
    fn test_price_to_tick_domain() {
        assert!(matches!(
            price_to_tick(Decimal::ZERO),
            Err(EngineError::TickConversion { .. })
        ));
        assert!(price_to_tick(dec!(-1)).is_err());
        assert!(price_to_tick(dec!(0.0000000000001)).is_err());
        assert_eq!(price_to_tick(MIN_SPOT_PRICE).unwrap(), -108_000_000);
        assert_eq!(MAX_SPOT_PRICE, pow10(28));
        assert!(price_to_tick(MAX_SPOT_PRICE).is_ok());
        assert!(price_to_tick(MAX_SPOT_PRICE + Decimal::ONE).is_err());
    }

    #[test]
    fn test_round_down_to_spacing() {
        assert_eq!(round_down_to_spacing(0, 100).unwrap(), 0);
        assert_eq!(round_down_to_spacing(199, 100).unwrap(), 100);
        assert_eq!(round_down_to_spacing(-1, 100).unwrap(), -100);
        assert_eq!(round_down_to_spacing(-100, 100).unwrap(), -100);
        assert!(round_down_to_spacing(i64::MIN, 100).is_err());
        assert!(round_down_to_spacing(10, 0).is_err());
    }

    #[test]
    fn test_round_down_to_spacing_properties() {
        let mut tick: i64 = -1_000_003;
        while tick < 1_000_003 {
            for spacing in [1, 7, 100, 1_000] {
                let rounded = round_down_to_spacing(tick, spacing).unwrap();
                assert!(rounded <= tick);
                assert_eq!(rounded.rem_euclid(spacing), 0);
                assert!(tick - rounded < spacing);
            }
            tick += 997;
        }
    }

    #[test]
    fn test_calculate_buy_sell_ticks_basic() {
        let ticks = calculate_buy_sell_ticks(dec!(1.0), dec!(1.0), dec!(0.1), TICK_SPACING).unwrap();
        assert_eq!(ticks.buy_tick, 0);
        assert_eq!(ticks.buy_lower_tick, -1_000_000);
        assert_eq!(ticks.sell_tick, 0);
        assert_eq!(ticks.sell_upper_tick, 100_000);
    }

    #[test]
    fn test_calculate_buy_sell_ticks_below_one() {
        let ticks = calculate_buy_sell_ticks(dec!(0.9), dec!(1.0), dec!(0.1), TICK_SPACING).unwrap();
        assert_eq!(ticks.buy_tick, -1_000_000);
        assert_eq!(ticks.buy_lower_tick, -1_900_000);
        assert_eq!(ticks.sell_tick, 0);
        assert_eq!(ticks.sell_upper_tick, 100_000);
    }

    #[test]
    fn test_calculate_buy_sell_ticks_above_one() {
        let ticks =
            calculate_buy_sell_ticks(dec!(10.1), dec!(10.3), dec!(0.1), TICK_SPACING).unwrap();
        assert_eq!(ticks.buy_tick, 9_010_000);
        assert_eq!(ticks.buy_lower_tick, 8_090_000);
        assert_eq!(ticks.sell_tick, 9_030_000);
        assert_eq!(ticks.sell_upper_tick, 9_133_000);
    }

    #[test]
    fn test_calculate_buy_sell_ticks_small_prices() {
        let ticks =
            calculate_buy_sell_ticks(dec!(0.17), dec!(0.18), dec!(0.1), TICK_SPACING).unwrap();
        assert_eq!(ticks.buy_tick, -8_300_000);
        assert_eq!(ticks.buy_lower_tick, -8_470_000);
        assert_eq!(ticks.sell_tick, -8_200_000);
        assert_eq!(ticks.sell_upper_tick, -8_020_000);
    }

    #[test]
    fn test_calculate_buy_sell_ticks_rejects_zero_price() {
        assert!(calculate_buy_sell_ticks(dec!(0), dec!(1.0), dec!(0.1), TICK_SPACING).is_err());
    }

    #[test]
    fn test_adjust_buy_side_straddling_current_tick() {
        let (lower, upper) =
            adjust_for_current_tick(true, -200_050, -500_000, 0, TICK_SPACING).unwrap();
        assert_eq!(upper, -200_200);
        assert_eq!(lower, -500_000);
    }

    #[test]
    fn test_adjust_sell_side_straddling_current_tick() {
        let (lower, upper) =
            adjust_for_current_tick(false, 3_100_000, 3_000_000, 3_200_000, TICK_SPACING)
                .unwrap();
        assert_eq!(lower, 3_100_100);
        assert_eq!(upper, 3_200_000);
    }

    #[test]
    fn test_adjust_pushes_thin_lower_bound() {
        // Rounding drags the lower bound under the current tick.
        let (lower, upper) =
            adjust_for_current_tick(false, 150, 160, 1_000, TICK_SPACING).unwrap();
        assert_eq!(lower, 400);
        assert_eq!(upper, 1_000);
    }

    #[test]
    fn test_adjust_leaves_distant_range_alone() {
        let (lower, upper) =
            adjust_for_current_tick(true, 1_500_000, -500_000, 0, TICK_SPACING).unwrap();
        assert_eq!((lower, upper), (-500_000, 0));
    }

    #[test]
    fn test_adjust_never_straddles_current_tick() {
        let mut current: i64 = -5_003;
        while current <= 5_003 {
            for (lower, upper) in [(-5_000, 5_000), (-300, 40), (0, 0), (17, 2_399), (-999, -1)] {
                for is_buy in [true, false] {
                    let (adj_lower, adj_upper) =
                        adjust_for_current_tick(is_buy, current, lower, upper, TICK_SPACING)
                            .unwrap();
                    assert!(
                        !(adj_lower < current && current < adj_upper),
                        "current={current} in=({lower},{upper}) out=({adj_lower},{adj_upper}) buy={is_buy}"
                    );
                }
            }
            current += 37;
        }
    }
}
