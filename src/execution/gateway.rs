use async_trait::async_trait;

use crate::error::{QueryError, SubmissionError};
use crate::models::chain::PoolRef;
use crate::models::derivative::{DerivativeConfig, DerivativeState};
use crate::models::message::OutboundMessage;
use crate::models::position::Position;

/// Read side of the chain, as seen by one reconciliation cycle.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Spot price of `pool.base_denom` in `pool.quote_denom`, as decimal text.
    async fn spot_price(&self, pool: &PoolRef) -> Result<String, QueryError>;

    async fn current_tick(&self, pool_id: u64) -> Result<i64, QueryError>;

    async fn open_positions(&self, pool_id: u64, owner: &str) -> Result<Vec<Position>, QueryError>;

    async fn derivative_config(&self, contract: &str) -> Result<DerivativeConfig, QueryError>;

    async fn derivative_state(&self, contract: &str) -> Result<DerivativeState, QueryError>;
}

/// Signs and broadcasts one transaction carrying `messages` in order.
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Returns the transaction hash.
    async fn submit(&self, owner: &str, messages: &[OutboundMessage]) -> Result<String, SubmissionError>;
}
