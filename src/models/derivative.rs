use serde::{Deserialize, Serialize};

use super::chain::PoolRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub denom: String,
    pub decimals: u64,
}

/// Configuration of the power perpetual contract, as returned by its
/// `{"config": {}}` smart query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeConfig {
    pub power_pool: PoolRef,
    pub base_pool: PoolRef,
    pub index_scale: u64,
    #[serde(default)]
    pub fee_rate: String,
    #[serde(default, rename = "min_collateral_amount")]
    pub min_collateral: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub query_contract: Option<String>,
    #[serde(default)]
    pub fee_pool_contract: Option<String>,
    #[serde(default)]
    pub power_asset: Option<AssetInfo>,
    #[serde(default)]
    pub base_asset: Option<AssetInfo>,
    #[serde(default)]
    pub funding_period: Option<u64>,
}

/// Mutable state of the power perpetual contract (`{"state": {}}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeState {
    /// Decimal string; de-levers the power price into a mark price.
    #[serde(rename = "normalisation_factor")]
    pub normalization_factor: String,
    pub is_open: bool,
    pub is_paused: bool,
    #[serde(default)]
    pub last_pause: Option<String>,
    #[serde(default)]
    pub last_funding_update: String,
}
