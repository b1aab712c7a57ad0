use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::QueryError;
use crate::execution::gateway::ChainQuery;
use crate::models::chain::{Coin, PoolRef};
use crate::models::derivative::{DerivativeConfig, DerivativeState};
use crate::models::position::Position;
use crate::models::serde_str;

/// REST (LCD) client for the chain's query gateway.
///
/// Reads pool-manager spot prices and pools, concentrated-liquidity
/// positions, and CosmWasm smart queries against the power contract.
pub struct LcdClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SpotPriceResponse {
    spot_price: String,
}

#[derive(Debug, Deserialize)]
struct PoolResponse {
    pool: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UserPositionsResponse {
    #[serde(default)]
    positions: Vec<FullPositionBreakdown>,
}

#[derive(Debug, Deserialize)]
struct FullPositionBreakdown {
    position: PositionRecord,
    asset0: Coin,
    asset1: Coin,
}

#[derive(Debug, Deserialize)]
struct PositionRecord {
    #[serde(with = "serde_str")]
    position_id: u64,
    address: String,
    #[serde(with = "serde_str")]
    pool_id: u64,
    #[serde(with = "serde_str")]
    lower_tick: i64,
    #[serde(with = "serde_str")]
    upper_tick: i64,
    liquidity: String,
}

#[derive(Debug, Deserialize)]
struct SmartQueryResponse<T> {
    data: T,
}

impl From<FullPositionBreakdown> for Position {
    fn from(full: FullPositionBreakdown) -> Self {
        Position {
            position_id: full.position.position_id,
            owner: full.position.address,
            pool_id: full.position.pool_id,
            lower_tick: full.position.lower_tick,
            upper_tick: full.position.upper_tick,
            liquidity: full.position.liquidity,
            asset0: full.asset0,
            asset1: full.asset1,
        }
    }
}

impl LcdClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &'static str,
    ) -> Result<T, QueryError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {url} {query:?}");

        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| QueryError::Decode {
            what,
            reason: e.to_string(),
        })
    }

    async fn smart_query<T: DeserializeOwned>(
        &self,
        contract: &str,
        query: &serde_json::Value,
        what: &'static str,
    ) -> Result<T, QueryError> {
        let encoded = URL_SAFE.encode(query.to_string());
        let path = format!("/cosmwasm/wasm/v1/contract/{contract}/smart/{encoded}");
        let resp: SmartQueryResponse<T> = self.get_json(&path, &[], what).await?;
        Ok(resp.data)
    }
}

/// Current tick of a concentrated-liquidity pool; other pool types lack it.
fn current_tick_of(pool: &serde_json::Value) -> Result<i64, QueryError> {
    let decode = |reason: &str| QueryError::Decode {
        what: "pool",
        reason: reason.to_string(),
    };

    match pool.get("current_tick") {
        Some(serde_json::Value::String(raw)) => raw
            .parse()
            .map_err(|e: std::num::ParseIntError| decode(&e.to_string())),
        Some(serde_json::Value::Number(n)) => n.as_i64().ok_or_else(|| decode("tick out of range")),
        _ => Err(decode("not a concentrated-liquidity pool")),
    }
}

#[async_trait]
impl ChainQuery for LcdClient {
    async fn spot_price(&self, pool: &PoolRef) -> Result<String, QueryError> {
        debug!(
            "Requesting spot price for pool {} base={} quote={}",
            pool.id, pool.base_denom, pool.quote_denom
        );
        let path = format!("/osmosis/poolmanager/v1beta1/pools/{}/prices", pool.id);
        let query = [
            ("base_asset_denom", pool.base_denom.clone()),
            ("quote_asset_denom", pool.quote_denom.clone()),
        ];
        let resp: SpotPriceResponse = self.get_json(&path, &query, "spot price").await?;
        Ok(resp.spot_price)
    }

    async fn current_tick(&self, pool_id: u64) -> Result<i64, QueryError> {
        let path = format!("/osmosis/poolmanager/v1beta1/pools/{pool_id}");
        let resp: PoolResponse = self.get_json(&path, &[], "pool").await?;
        current_tick_of(&resp.pool)
    }

    async fn open_positions(&self, pool_id: u64, owner: &str) -> Result<Vec<Position>, QueryError> {
        let path = format!("/osmosis/concentratedliquidity/v1beta1/positions/{owner}");
        let query = [("pool_id", pool_id.to_string())];
        let resp: UserPositionsResponse = self.get_json(&path, &query, "user positions").await?;
        Ok(resp.positions.into_iter().map(Position::from).collect())
    }

    async fn derivative_config(&self, contract: &str) -> Result<DerivativeConfig, QueryError> {
        self.smart_query(contract, &serde_json::json!({ "config": {} }), "contract config")
            .await
    }

    async fn derivative_state(&self, contract: &str) -> Result<DerivativeState, QueryError> {
        self.smart_query(contract, &serde_json::json!({ "state": {} }), "contract state")
            .await
    }
}
