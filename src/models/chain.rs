use serde::{Deserialize, Serialize};
use std::fmt;

use super::serde_str;

/// A venue pool addressed for spot-price queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRef {
    pub id: u64,
    pub base_denom: String,
    pub quote_denom: String,
}

impl PoolRef {
    pub fn new(id: u64, base_denom: impl Into<String>, quote_denom: impl Into<String>) -> Self {
        Self {
            id,
            base_denom: base_denom.into(),
            quote_denom: quote_denom.into(),
        }
    }
}

/// An on-chain token amount. Amounts are integers in the denom's base unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(with = "serde_str")]
    pub amount: u128,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u128) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// Sum two coins of the same denom. `None` on denom mismatch or overflow.
    pub fn checked_add(&self, other: &Coin) -> Option<Coin> {
        if self.denom != other.denom {
            return None;
        }
        let amount = self.amount.checked_add(other.amount)?;
        Some(Coin::new(self.denom.clone(), amount))
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}
