use serde::{Deserialize, Serialize};

use super::chain::Coin;
use super::position::Position;
use super::serde_str;

pub const WITHDRAW_POSITION_TYPE_URL: &str =
    "/osmosis.concentratedliquidity.v1beta1.MsgWithdrawPosition";
pub const CREATE_POSITION_TYPE_URL: &str =
    "/osmosis.concentratedliquidity.v1beta1.MsgCreatePosition";

/// A protocol message handed to the submitter, in proto-JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum OutboundMessage {
    #[serde(rename = "/osmosis.concentratedliquidity.v1beta1.MsgWithdrawPosition")]
    WithdrawPosition(WithdrawPosition),
    #[serde(rename = "/osmosis.concentratedliquidity.v1beta1.MsgCreatePosition")]
    CreatePosition(CreatePosition),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawPosition {
    #[serde(with = "serde_str")]
    pub position_id: u64,
    #[serde(rename = "sender")]
    pub owner: String,
    #[serde(rename = "liquidity_amount")]
    pub liquidity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePosition {
    #[serde(with = "serde_str")]
    pub pool_id: u64,
    pub sender: String,
    #[serde(with = "serde_str")]
    pub lower_tick: i64,
    #[serde(with = "serde_str")]
    pub upper_tick: i64,
    pub tokens_provided: Vec<Coin>,
    #[serde(rename = "token_min_amount0", with = "serde_str")]
    pub min_amount0: u128,
    #[serde(rename = "token_min_amount1", with = "serde_str")]
    pub min_amount1: u128,
}

impl OutboundMessage {
    /// Full withdrawal of an existing position.
    pub fn withdraw(position: &Position) -> Self {
        OutboundMessage::WithdrawPosition(WithdrawPosition {
            position_id: position.position_id,
            owner: position.owner.clone(),
            liquidity: position.liquidity.clone(),
        })
    }

    pub fn type_url(&self) -> &'static str {
        match self {
            OutboundMessage::WithdrawPosition(_) => WITHDRAW_POSITION_TYPE_URL,
            OutboundMessage::CreatePosition(_) => CREATE_POSITION_TYPE_URL,
        }
    }

    pub fn is_withdraw(&self) -> bool {
        matches!(self, OutboundMessage::WithdrawPosition(_))
    }

    pub fn as_create(&self) -> Option<&CreatePosition> {
        match self {
            OutboundMessage::CreatePosition(msg) => Some(msg),
            OutboundMessage::WithdrawPosition(_) => None,
        }
    }
}
