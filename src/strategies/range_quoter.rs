use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::quote::{QuotePrices, QuoteRanges};
use crate::pricing::tick_math::{adjust_range, calculate_buy_sell_ticks};

/// Turns the cycle's prices into a buy range and a sell range on the pool's
/// tick grid.
///
/// The pool quotes the inverse of the contract's prices, so the inverse
/// target and inverse power spot prices bracket the quote: the lower one
/// becomes the buy price, the higher one the sell price. Each side is then
/// widened by the spread, kept off the live tick and checked for ordering.
#[derive(Debug, Clone)]
pub struct RangeQuoter {
    spread: Decimal,
    tick_spacing: i64,
}

impl RangeQuoter {
    pub fn new(spread: Decimal, tick_spacing: i64) -> Self {
        Self {
            spread,
            tick_spacing,
        }
    }

    /// Invert target and power prices and sort them into buy < sell.
    pub fn quote_prices(target_price: Decimal, power_spot_price: Decimal) -> EngineResult<QuotePrices> {
        let inverse_target = invert(target_price, "target price")?;
        let inverse_power = invert(power_spot_price, "power spot price")?;

        Ok(QuotePrices {
            buy: inverse_target.min(inverse_power),
            sell: inverse_target.max(inverse_power),
        })
    }

    /// Build both ranges around `current_tick`. Fails rather than return
    /// ranges violating `low < buy < sell < high`.
    pub fn quote_ranges(&self, prices: QuotePrices, current_tick: i64) -> EngineResult<QuoteRanges> {
        let ticks =
            calculate_buy_sell_ticks(prices.buy, prices.sell, self.spread, self.tick_spacing)?;
        let raw = QuoteRanges::from_ticks(ticks);

        let ranges = QuoteRanges {
            buy: adjust_range(true, current_tick, raw.buy, self.tick_spacing)?,
            sell: adjust_range(false, current_tick, raw.sell, self.tick_spacing)?,
        };

        debug!(
            current_tick,
            low = ranges.buy.lower_tick,
            buy = ranges.buy.upper_tick,
            sell = ranges.sell.lower_tick,
            high = ranges.sell.upper_tick,
            "adjusted quote ranges"
        );

        ranges.ensure_ordered()?;
        Ok(ranges)
    }
}

fn invert(price: Decimal, what: &str) -> EngineResult<Decimal> {
    if price <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!(
            "{what} must be positive to invert, got {price}"
        )));
    }
    Decimal::ONE
        .checked_div(price)
        .ok_or_else(|| EngineError::PrecisionLoss(format!("inverse of {what} {price} overflows")))
}
