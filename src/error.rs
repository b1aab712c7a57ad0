use std::time::Duration;

use thiserror::Error;

/// Failure of a read against the chain gateway.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Failure of the transaction submission collaborator.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broadcast endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    #[error("transaction rejected with code {code}: {raw_log}")]
    Rejected { code: u32, raw_log: String },

    #[error("failed to encode messages: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("signer misconfigured: {0}")]
    Config(String),
}

/// Everything that can abort a reconciliation cycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("precision loss: {0}")]
    PrecisionLoss(String),

    #[error("cannot convert price {price} to a tick: {reason}")]
    TickConversion { price: String, reason: &'static str },

    #[error("cannot round tick {tick} to spacing {spacing}")]
    Rounding { tick: i64, spacing: i64 },

    #[error("ticks out of order: low={low} buy={buy} sell={sell} high={high}")]
    TickOrdering {
        low: i64,
        buy: i64,
        sell: i64,
        high: i64,
    },

    #[error("expected 0 or 2 open positions, found {0}")]
    UnexpectedPositionCount(usize),

    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error("submission failed: {0}")]
    Submission(#[from] SubmissionError),

    #[error("event subscription closed")]
    SubscriptionClosed,
}

impl EngineError {
    /// Whether the controller must stop instead of skipping the cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::SubscriptionClosed)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
