use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cosmrs::crypto::secp256k1::SigningKey;
use cosmrs::crypto::PublicKey;
use cosmrs::tendermint::chain;
use cosmrs::tx::{Body, Fee, SignDoc, SignerInfo};
use osmosis_std::types::cosmos::base::v1beta1::Coin as ProtoCoin;
use osmosis_std::types::osmosis::concentratedliquidity::v1beta1::{
    MsgCreatePosition, MsgWithdrawPosition,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SignerConfig;
use crate::error::SubmissionError;
use crate::execution::gateway::TxSubmitter;
use crate::models::message::OutboundMessage;
use crate::models::serde_str;

/// Fractional digits of the chain's fixed-point decimal.
const DEC_PRECISION: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GasLimit {
    /// Simulate, then scale the reported usage by the adjustment.
    Auto,
    Fixed(u64),
}

impl GasLimit {
    pub fn parse(raw: &str) -> Result<Self, SubmissionError> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("auto") {
            return Ok(GasLimit::Auto);
        }
        raw.parse()
            .map(GasLimit::Fixed)
            .map_err(|e| SubmissionError::Config(format!("gas {raw:?} is neither auto nor a limit: {e}")))
    }
}

/// Parse a fee such as `2500uosmo`.
pub fn parse_fee(raw: &str) -> Result<cosmrs::Coin, SubmissionError> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (amount, denom) = raw.split_at(split);
    if amount.is_empty() || denom.is_empty() {
        return Err(SubmissionError::Config(format!(
            "fee {raw:?} must be an amount followed by a denom"
        )));
    }

    let amount: u128 = amount
        .parse()
        .map_err(|e| SubmissionError::Config(format!("fee amount in {raw:?}: {e}")))?;
    cosmrs::Coin::new(amount, denom)
        .map_err(|e| SubmissionError::Config(format!("fee denom in {raw:?}: {e}")))
}

/// Gas limit for a simulated usage, rounded up.
pub fn adjusted_gas(gas_used: u64, adjustment: f64) -> u64 {
    (gas_used as f64 * adjustment).ceil() as u64
}

/// Protobuf carries the chain's decimals as integers scaled by 10^18, while
/// the REST gateway reports them with a decimal point.
pub fn dec_to_proto(raw: &str) -> Result<String, SubmissionError> {
    let raw = raw.trim();
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());

    if (whole.is_empty() && fraction.is_empty())
        || !all_digits(whole)
        || !all_digits(fraction)
        || fraction.len() > DEC_PRECISION
    {
        return Err(SubmissionError::Decode {
            what: "liquidity amount",
            reason: format!("{raw:?} is not a decimal with at most {DEC_PRECISION} fractional digits"),
        });
    }

    let mut scaled = String::with_capacity(whole.len() + DEC_PRECISION);
    scaled.push_str(whole);
    scaled.push_str(fraction);
    scaled.extend(std::iter::repeat('0').take(DEC_PRECISION - fraction.len()));

    let trimmed = scaled.trim_start_matches('0');
    Ok(if trimmed.is_empty() { "0".into() } else { trimmed.into() })
}

/// Encode a message as the protobuf `Any` the transaction body carries.
pub fn to_any(message: &OutboundMessage) -> Result<cosmrs::Any, SubmissionError> {
    let any = match message {
        OutboundMessage::WithdrawPosition(msg) => MsgWithdrawPosition {
            position_id: msg.position_id,
            sender: msg.owner.clone(),
            liquidity_amount: dec_to_proto(&msg.liquidity)?,
        }
        .to_any(),
        OutboundMessage::CreatePosition(msg) => {
            let mut tokens: Vec<ProtoCoin> = msg
                .tokens_provided
                .iter()
                .map(|coin| ProtoCoin {
                    denom: coin.denom.clone(),
                    amount: coin.amount.to_string(),
                })
                .collect();
            // Coin lists must be sorted by denom.
            tokens.sort_by(|a, b| a.denom.cmp(&b.denom));

            MsgCreatePosition {
                pool_id: msg.pool_id,
                sender: msg.sender.clone(),
                lower_tick: msg.lower_tick,
                upper_tick: msg.upper_tick,
                tokens_provided: tokens,
                token_min_amount0: msg.min_amount0.to_string(),
                token_min_amount1: msg.min_amount1.to_string(),
            }
            .to_any()
        }
    };

    Ok(cosmrs::Any {
        type_url: any.type_url,
        value: any.value,
    })
}

fn parse_key(private_key: &str) -> Result<SigningKey, SubmissionError> {
    let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
        .map_err(|e| SubmissionError::Config(format!("private key is not hex: {e}")))?;
    SigningKey::from_slice(&bytes)
        .map_err(|e| SubmissionError::Config(format!("private key is not a secp256k1 key: {e}")))
}

/// Bech32 address of a hex private key.
pub fn derive_address(private_key: &str, prefix: &str) -> Result<String, SubmissionError> {
    let key = parse_key(private_key)?;
    account_address(&key.public_key(), prefix)
}

fn account_address(public_key: &PublicKey, prefix: &str) -> Result<String, SubmissionError> {
    public_key
        .account_id(prefix)
        .map(|id| id.to_string())
        .map_err(|e| SubmissionError::Config(format!("cannot derive {prefix} address: {e}")))
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: BaseAccount,
}

/// Signing coordinates of the sender.
#[derive(Debug, Clone, Copy, Deserialize)]
struct BaseAccount {
    #[serde(with = "serde_str")]
    account_number: u64,
    #[serde(default, with = "serde_str")]
    sequence: u64,
}

#[derive(Debug, Serialize)]
struct SimulateRequest<'a> {
    tx_bytes: &'a str,
}

#[derive(Debug, Deserialize)]
struct SimulateResponse {
    gas_info: GasInfo,
}

#[derive(Debug, Deserialize)]
struct GasInfo {
    #[serde(with = "serde_str")]
    gas_used: u64,
}

#[derive(Debug, Serialize)]
struct BroadcastTxRequest<'a> {
    tx_bytes: &'a str,
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct BroadcastTxResponse {
    tx_response: TxResponse,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

impl TxResponse {
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

/// Signs each cycle's messages with the configured key and broadcasts them
/// as one transaction through the node's REST gateway.
///
/// Account number and sequence are read before every submission; cycles
/// never overlap, so the sequence read is the one the transaction consumes.
pub struct NodeSubmitter {
    base_url: String,
    http: reqwest::Client,
    key: SigningKey,
    public_key: PublicKey,
    address: String,
    chain_id: chain::Id,
    memo: String,
    fee: cosmrs::Coin,
    gas: GasLimit,
    gas_adjustment: f64,
}

impl NodeSubmitter {
    /// Fails when the key is missing or malformed, or derives an address
    /// other than the configured signer.
    pub fn new(lcd_url: &str, signer: &SignerConfig, timeout: Duration) -> Result<Self, SubmissionError> {
        let raw_key = signer
            .private_key
            .as_deref()
            .ok_or_else(|| SubmissionError::Config("no signing key configured".into()))?;
        let key = parse_key(raw_key)?;
        let public_key = key.public_key();

        let address = account_address(&public_key, &signer.address_prefix)?;
        if address != signer.address {
            return Err(SubmissionError::Config(format!(
                "key belongs to {address}, signer is {}",
                signer.address
            )));
        }

        let chain_id = signer
            .chain_id
            .parse::<chain::Id>()
            .map_err(|e| SubmissionError::Config(format!("chain id {:?}: {e}", signer.chain_id)))?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: lcd_url.trim_end_matches('/').to_string(),
            http,
            key,
            public_key,
            address,
            chain_id,
            memo: signer.memo.clone(),
            fee: parse_fee(&signer.fees)?,
            gas: GasLimit::parse(&signer.gas)?,
            gas_adjustment: signer.gas_adjustment,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Signed transaction bytes for the given account state and gas limit.
    fn sign(
        &self,
        messages: &[OutboundMessage],
        account: BaseAccount,
        gas_limit: u64,
    ) -> Result<Vec<u8>, SubmissionError> {
        let signing = |e: cosmrs::ErrorReport| SubmissionError::Signing(e.to_string());

        let anys = messages.iter().map(to_any).collect::<Result<Vec<_>, _>>()?;
        let body = Body::new(anys, self.memo.clone(), 0u32);
        let auth_info = SignerInfo::single_direct(Some(self.public_key), account.sequence)
            .auth_info(Fee::from_amount_and_gas(self.fee.clone(), gas_limit));

        let sign_doc = SignDoc::new(&body, &auth_info, &self.chain_id, account.account_number)
            .map_err(signing)?;
        sign_doc.sign(&self.key).map_err(signing)?.to_bytes().map_err(signing)
    }

    async fn account(&self) -> Result<BaseAccount, SubmissionError> {
        let url = format!("{}/cosmos/auth/v1beta1/accounts/{}", self.base_url, self.address);
        debug!("GET {url}");
        let resp = self.http.get(&url).send().await?;
        let account: AccountResponse = decode(resp, "account").await?;
        Ok(account.account)
    }

    async fn simulate(&self, tx_bytes: &[u8]) -> Result<u64, SubmissionError> {
        let encoded = STANDARD.encode(tx_bytes);
        let url = format!("{}/cosmos/tx/v1beta1/simulate", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&SimulateRequest { tx_bytes: &encoded })
            .send()
            .await?;
        let simulated: SimulateResponse = decode(resp, "simulation").await?;
        Ok(simulated.gas_info.gas_used)
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<String, SubmissionError> {
        let encoded = STANDARD.encode(tx_bytes);
        let url = format!("{}/cosmos/tx/v1beta1/txs", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&BroadcastTxRequest {
                tx_bytes: &encoded,
                mode: "BROADCAST_MODE_SYNC",
            })
            .send()
            .await?;
        let broadcast: BroadcastTxResponse = decode(resp, "broadcast response").await?;
        broadcast.tx_response.into_result()
    }
}

async fn decode<T: DeserializeOwned>(
    resp: reqwest::Response,
    what: &'static str,
) -> Result<T, SubmissionError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(SubmissionError::Status {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| SubmissionError::Decode {
        what,
        reason: e.to_string(),
    })
}

#[async_trait]
impl TxSubmitter for NodeSubmitter {
    async fn submit(&self, owner: &str, messages: &[OutboundMessage]) -> Result<String, SubmissionError> {
        if owner != self.address {
            return Err(SubmissionError::Config(format!(
                "cannot sign for {owner} with the key of {}",
                self.address
            )));
        }

        let account = self.account().await?;
        let gas_limit = match self.gas {
            GasLimit::Fixed(limit) => limit,
            GasLimit::Auto => {
                let draft = self.sign(messages, account, 0)?;
                let used = self.simulate(&draft).await?;
                adjusted_gas(used, self.gas_adjustment)
            }
        };

        let tx_bytes = self.sign(messages, account, gas_limit)?;
        info!(
            messages = messages.len(),
            gas_limit,
            sequence = account.sequence,
            "Broadcasting signed transaction"
        );
        self.broadcast(&tx_bytes).await
    }
}
