use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SignerConfig;
use crate::error::SubmissionError;
use crate::execution::gateway::TxSubmitter;
use crate::models::message::OutboundMessage;

/// Body sent to the signing relay, for deployments that keep the key outside
/// this process. The relay signs the messages as one transaction and
/// broadcasts it.
#[derive(Debug, Serialize)]
struct BroadcastRequest<'a> {
    signer: &'a str,
    memo: &'a str,
    fees: &'a str,
    gas: &'a str,
    gas_adjustment: f64,
    messages: &'a [OutboundMessage],
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

impl BroadcastResponse {
    fn into_result(self) -> Result<String, SubmissionError> {
        if self.code != 0 {
            return Err(SubmissionError::Rejected {
                code: self.code,
                raw_log: self.raw_log,
            });
        }
        Ok(self.txhash)
    }
}

/// Submits each cycle's messages as a single transaction through an HTTP
/// signing relay.
pub struct RelaySubmitter {
    endpoint: String,
    memo: String,
    fees: String,
    gas: String,
    gas_adjustment: f64,
    http: reqwest::Client,
}

impl RelaySubmitter {
    /// Fails when the signer config has no relay url.
    pub fn new(signer: &SignerConfig, timeout: Duration) -> Result<Self, SubmissionError> {
        let base = signer
            .broadcast_url
            .as_deref()
            .ok_or_else(|| SubmissionError::Config("no broadcast url configured".into()))?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint: format!("{}/broadcast", base.trim_end_matches('/')),
            memo: signer.memo.clone(),
            fees: signer.fees.clone(),
            gas: signer.gas.clone(),
            gas_adjustment: signer.gas_adjustment,
            http,
        })
    }

    fn request<'a>(&'a self, owner: &'a str, messages: &'a [OutboundMessage]) -> BroadcastRequest<'a> {
        BroadcastRequest {
            signer: owner,
            memo: &self.memo,
            fees: &self.fees,
            gas: &self.gas,
            gas_adjustment: self.gas_adjustment,
            messages,
        }
    }
}

#[async_trait]
impl TxSubmitter for RelaySubmitter {
    async fn submit(&self, owner: &str, messages: &[OutboundMessage]) -> Result<String, SubmissionError> {
        let body = serde_json::to_string(&self.request(owner, messages))?;
        info!("Broadcasting {} messages for {owner}", messages.len());
        debug!("Broadcast body: {body}");

        let resp = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(SubmissionError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: BroadcastResponse =
            serde_json::from_str(&text).map_err(|e| SubmissionError::Decode {
                what: "relay response",
                reason: e.to_string(),
            })?;
        parsed.into_result()
    }
}

/// Logs the transaction it would have sent and reports a synthetic hash.
#[derive(Debug, Default)]
pub struct DryRunSubmitter;

#[async_trait]
impl TxSubmitter for DryRunSubmitter {
    async fn submit(&self, owner: &str, messages: &[OutboundMessage]) -> Result<String, SubmissionError> {
        let body = serde_json::to_string_pretty(messages)?;
        info!("[DRY RUN] {} messages for {owner}:\n{body}", messages.len());
        Ok(format!("dry-run-{}", Uuid::new_v4()))
    }
}
