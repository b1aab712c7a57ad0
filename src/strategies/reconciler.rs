use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::chain::Coin;
use crate::models::message::{CreatePosition, OutboundMessage};
use crate::models::position::Position;
use crate::models::quote::{QuoteRanges, TickRange};

/// Minimum amounts accepted on position creation. Slippage protection is not
/// applied to the quote.
pub const MIN_AMOUNT0: u128 = 0;
pub const MIN_AMOUNT1: u128 = 0;

/// How much of each pool asset the next pair of positions receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sizing {
    /// Pool token0; funds the sell side.
    pub base: Coin,
    /// Pool token1; funds the buy side.
    pub quote: Coin,
}

/// Replaces the agent's resting positions with a fresh buy/sell pair.
///
/// With no open positions the pair is funded from the configured defaults.
/// With exactly two, both are withdrawn and everything they held funds the
/// new pair. Any other count means on-chain state no longer matches what the
/// agent placed, and the cycle is refused.
#[derive(Debug, Clone)]
pub struct PositionReconciler {
    pool_id: u64,
    sender: String,
    defaults: Sizing,
}

impl PositionReconciler {
    pub fn new(pool_id: u64, sender: impl Into<String>, defaults: Sizing) -> Self {
        Self {
            pool_id,
            sender: sender.into(),
            defaults,
        }
    }

    /// Withdrawals for the existing positions plus the sizing they free up.
    pub fn plan_withdrawals(
        &self,
        positions: &[Position],
    ) -> EngineResult<(Vec<OutboundMessage>, Sizing)> {
        match positions {
            [] => {
                info!("No positions found, sizing from defaults");
                Ok((Vec::new(), self.defaults.clone()))
            }
            [first, second] => {
                info!("Found open positions, withdrawing both");

                let withdrawals = positions
                    .iter()
                    .map(|p| {
                        debug!(
                            position_id = p.position_id,
                            liquidity = %p.liquidity,
                            "withdrawing position"
                        );
                        OutboundMessage::withdraw(p)
                    })
                    .collect();

                let base = sum_coins(&first.asset0, &second.asset0)?;
                let quote = sum_coins(&first.asset1, &second.asset1)?;

                debug!(token0 = %base, token1 = %quote, "freed liquidity");

                Ok((withdrawals, Sizing { base, quote }))
            }
            other => Err(EngineError::UnexpectedPositionCount(other.len())),
        }
    }

    /// Full message list for the cycle: withdrawals first, then buy, then sell.
    pub fn reconcile(
        &self,
        positions: &[Position],
        ranges: &QuoteRanges,
    ) -> EngineResult<Vec<OutboundMessage>> {
        let (mut messages, sizing) = self.plan_withdrawals(positions)?;

        messages.push(self.create_position(&ranges.buy, &sizing.quote));
        messages.push(self.create_position(&ranges.sell, &sizing.base));

        Ok(messages)
    }

    fn create_position(&self, range: &TickRange, funding: &Coin) -> OutboundMessage {
        let tokens_provided = if funding.is_zero() {
            warn!(
                denom = %funding.denom,
                lower_tick = range.lower_tick,
                upper_tick = range.upper_tick,
                "position has no funding"
            );
            Vec::new()
        } else {
            vec![funding.clone()]
        };

        OutboundMessage::CreatePosition(CreatePosition {
            pool_id: self.pool_id,
            sender: self.sender.clone(),
            lower_tick: range.lower_tick,
            upper_tick: range.upper_tick,
            tokens_provided,
            min_amount0: MIN_AMOUNT0,
            min_amount1: MIN_AMOUNT1,
        })
    }
}

fn sum_coins(a: &Coin, b: &Coin) -> EngineResult<Coin> {
    a.checked_add(b).ok_or_else(|| {
        EngineError::InvalidInput(format!("cannot add position assets {a} and {b}"))
    })
}
