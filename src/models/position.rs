use serde::{Deserialize, Serialize};

use super::chain::Coin;

/// A concentrated-liquidity position previously opened by the agent.
///
/// `liquidity` stays in the chain's own decimal text so a withdrawal can hand
/// back exactly what the chain reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: u64,
    pub owner: String,
    pub pool_id: u64,
    pub lower_tick: i64,
    pub upper_tick: i64,
    pub liquidity: String,
    pub asset0: Coin,
    pub asset1: Coin,
}
