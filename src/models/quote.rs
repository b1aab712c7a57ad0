use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Raw spot prices of the base and power pools, in the chain's decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSet {
    pub base_spot_price: String,
    pub power_spot_price: String,
}

/// Valuations derived once per cycle. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteBasis {
    pub mark_price: f64,
    pub index_price: f64,
    pub target_price: f64,
    pub premium: f64,
}

/// The two prices the quote is placed around, in pool terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePrices {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Spacing-rounded ticks of the four quote boundaries, before any
/// current-tick adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuySellTicks {
    pub buy_tick: i64,
    pub buy_lower_tick: i64,
    pub sell_tick: i64,
    pub sell_upper_tick: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRange {
    pub lower_tick: i64,
    pub tick_at_price: i64,
    pub upper_tick: i64,
}

/// Buy range `[low, buy]` and sell range `[sell, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRanges {
    pub buy: TickRange,
    pub sell: TickRange,
}

impl QuoteRanges {
    pub fn from_ticks(ticks: BuySellTicks) -> Self {
        Self {
            buy: TickRange {
                lower_tick: ticks.buy_lower_tick,
                tick_at_price: ticks.buy_tick,
                upper_tick: ticks.buy_tick,
            },
            sell: TickRange {
                lower_tick: ticks.sell_tick,
                tick_at_price: ticks.sell_tick,
                upper_tick: ticks.sell_upper_tick,
            },
        }
    }

    /// Enforce `low < buy < sell < high`.
    pub fn ensure_ordered(&self) -> EngineResult<()> {
        let (low, buy) = (self.buy.lower_tick, self.buy.upper_tick);
        let (sell, high) = (self.sell.lower_tick, self.sell.upper_tick);

        if low < buy && buy < sell && sell < high {
            Ok(())
        } else {
            Err(EngineError::TickOrdering {
                low,
                buy,
                sell,
                high,
            })
        }
    }
}
