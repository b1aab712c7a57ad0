use anyhow::{anyhow, Context};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::controller::EngineSettings;
use crate::models::chain::{Coin, PoolRef};
use crate::pricing::tick_math::TICK_SPACING;
use crate::strategies::reconciler::Sizing;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    pub power_pool: PowerPoolConfig,
    pub position: PositionConfig,
    pub signer: SignerConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub lcd_url: String,
    pub rpc_ws_url: String,
    pub query_timeout_secs: u64,
    pub event_buffer: usize, // Triggers queued behind a running cycle
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerPoolConfig {
    pub pool_id: u64,
    pub base_asset: String,  // token0 of the pool
    pub quote_asset: String, // token1 of the pool
    pub contract_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    pub default_token0_amount: u128,
    pub default_token1_amount: u128,
    pub spread: Decimal, // Fraction, e.g. 0.1 = 10%
    pub tick_spacing: i64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    pub address: String,
    pub chain_id: String,
    pub address_prefix: String,
    /// Hex secp256k1 key; when set, transactions are signed in-process.
    #[serde(skip_serializing, default)]
    pub private_key: Option<String>,
    pub broadcast_url: Option<String>, // Optional signing relay
    pub memo: String,
    pub fees: String, // e.g. 2500uosmo
    pub gas: String,  // "auto" or a fixed limit
    pub gas_adjustment: f64,
    pub dry_run: bool,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("address_prefix", &self.address_prefix)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("broadcast_url", &self.broadcast_url)
            .field("memo", &self.memo)
            .field("fees", &self.fees)
            .field("gas", &self.gas)
            .field("gas_adjustment", &self.gas_adjustment)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// How a cycle's transaction leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Logged only.
    DryRun,
    /// Signed with the configured key and broadcast through the LCD.
    Node,
    /// Posted unsigned to a signing relay.
    Relay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub latency_summary_every: u64, // Cycles between latency summaries
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            lcd_url: "http://localhost:1317".into(),
            rpc_ws_url: "ws://localhost:26657/websocket".into(),
            query_timeout_secs: 10,
            event_buffer: 64,
        }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            default_token0_amount: 1_000_000,
            default_token1_amount: 1_000_000,
            spread: Decimal::new(1, 1),
            tick_spacing: TICK_SPACING,
        }
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            chain_id: "osmosis-1".into(),
            address_prefix: "osmo".into(),
            private_key: None,
            broadcast_url: None,
            memo: "flood".into(),
            fees: String::new(),
            gas: "auto".into(),
            gas_adjustment: 1.5,
            dry_run: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            power_pool: PowerPoolConfig {
                pool_id: 0,
                base_asset: String::new(),
                quote_asset: "uosmo".into(),
                contract_address: String::new(),
            },
            position: PositionConfig::default(),
            signer: SignerConfig::default(),
            telemetry: TelemetryConfig {
                log_level: "info".into(),
                latency_summary_every: 50,
            },
        }
    }
}

/// Reads one variable; blank values count as unset.
fn lookup_string(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reads and parses one variable. A value that is present but does not parse
/// is an error, never a silent fallback to the default.
fn lookup_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<T>>
where
    T::Err: fmt::Display,
{
    let Some(raw) = lookup_string(lookup, key) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|e| anyhow!("{key}={raw:?} is not valid: {e}"))
}

fn lookup_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = lookup_string(lookup, key) else {
        return Ok(None);
    };
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(anyhow!("{key}={raw:?} is not a boolean")),
    }
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Chain:     FLOOD_LCD_URL, FLOOD_RPC_WS_URL, FLOOD_QUERY_TIMEOUT_SECS,
    ///            FLOOD_EVENT_BUFFER
    /// Pool:      POWER_POOL_ID, POWER_POOL_BASE_ASSET, POWER_POOL_QUOTE_ASSET,
    ///            POWER_CONTRACT_ADDRESS
    /// Position:  DEFAULT_TOKEN0_AMOUNT, DEFAULT_TOKEN1_AMOUNT, POSITION_SPREAD,
    ///            TICK_SPACING
    /// Signer:    SIGNER_ADDRESS, SIGNER_PRIVATE_KEY, CHAIN_ID, ADDRESS_PREFIX,
    ///            FLOOD_BROADCAST_URL, TX_MEMO, TX_FEES, TX_GAS,
    ///            TX_GAS_ADJUSTMENT, DRY_RUN
    /// Telemetry: RUST_LOG (or LOG_LEVEL), LATENCY_SUMMARY_EVERY
    ///
    /// Unset variables keep their defaults; malformed ones fail the load.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup, applying defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup_string(&lookup, "FLOOD_LCD_URL") {
            config.chain.lcd_url = url;
        }
        if let Some(url) = lookup_string(&lookup, "FLOOD_RPC_WS_URL") {
            config.chain.rpc_ws_url = url;
        }
        if let Some(secs) = lookup_parse(&lookup, "FLOOD_QUERY_TIMEOUT_SECS")? {
            config.chain.query_timeout_secs = secs;
        }
        if let Some(buffer) = lookup_parse(&lookup, "FLOOD_EVENT_BUFFER")? {
            config.chain.event_buffer = buffer;
        }

        if let Some(id) = lookup_parse(&lookup, "POWER_POOL_ID")? {
            config.power_pool.pool_id = id;
        }
        if let Some(denom) = lookup_string(&lookup, "POWER_POOL_BASE_ASSET") {
            config.power_pool.base_asset = denom;
        }
        if let Some(denom) = lookup_string(&lookup, "POWER_POOL_QUOTE_ASSET") {
            config.power_pool.quote_asset = denom;
        }
        if let Some(addr) = lookup_string(&lookup, "POWER_CONTRACT_ADDRESS") {
            config.power_pool.contract_address = addr;
        }

        if let Some(amount) = lookup_parse(&lookup, "DEFAULT_TOKEN0_AMOUNT")? {
            config.position.default_token0_amount = amount;
        }
        if let Some(amount) = lookup_parse(&lookup, "DEFAULT_TOKEN1_AMOUNT")? {
            config.position.default_token1_amount = amount;
        }
        if let Some(spread) = lookup_parse(&lookup, "POSITION_SPREAD")? {
            config.position.spread = spread;
        }
        if let Some(spacing) = lookup_parse(&lookup, "TICK_SPACING")? {
            config.position.tick_spacing = spacing;
        }

        if let Some(addr) = lookup_string(&lookup, "SIGNER_ADDRESS") {
            config.signer.address = addr;
        }
        if let Some(chain_id) = lookup_string(&lookup, "CHAIN_ID") {
            config.signer.chain_id = chain_id;
        }
        if let Some(prefix) = lookup_string(&lookup, "ADDRESS_PREFIX") {
            config.signer.address_prefix = prefix;
        }
        config.signer.private_key = lookup_string(&lookup, "SIGNER_PRIVATE_KEY");
        config.signer.broadcast_url = lookup_string(&lookup, "FLOOD_BROADCAST_URL");
        if let Some(memo) = lookup_string(&lookup, "TX_MEMO") {
            config.signer.memo = memo;
        }
        if let Some(fees) = lookup_string(&lookup, "TX_FEES") {
            config.signer.fees = fees;
        }
        if let Some(gas) = lookup_string(&lookup, "TX_GAS") {
            config.signer.gas = gas;
        }
        if let Some(adj) = lookup_parse(&lookup, "TX_GAS_ADJUSTMENT")? {
            config.signer.gas_adjustment = adj;
        }
        if let Some(dry_run) = lookup_flag(&lookup, "DRY_RUN")? {
            config.signer.dry_run = dry_run;
        }

        if let Some(level) =
            lookup_string(&lookup, "RUST_LOG").or_else(|| lookup_string(&lookup, "LOG_LEVEL"))
        {
            config.telemetry.log_level = level.to_lowercase();
        }
        if let Some(every) = lookup_parse(&lookup, "LATENCY_SUMMARY_EVERY")? {
            config.telemetry.latency_summary_every = every;
        }

        Ok(config)
    }

    /// DRY_RUN wins; otherwise a configured key signs in-process, then a
    /// relay url. With neither, messages are only logged.
    pub fn submit_mode(&self) -> SubmitMode {
        if self.signer.dry_run {
            SubmitMode::DryRun
        } else if self.signer.private_key.is_some() {
            SubmitMode::Node
        } else if self.signer.broadcast_url.is_some() {
            SubmitMode::Relay
        } else {
            SubmitMode::DryRun
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.query_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.chain.lcd_url)
            .map_err(|e| anyhow::anyhow!("FLOOD_LCD_URL is not a valid url: {e}"))?;
        url::Url::parse(&self.chain.rpc_ws_url)
            .map_err(|e| anyhow::anyhow!("FLOOD_RPC_WS_URL is not a valid url: {e}"))?;
        if let Some(relay) = &self.signer.broadcast_url {
            url::Url::parse(relay)
                .map_err(|e| anyhow::anyhow!("FLOOD_BROADCAST_URL is not a valid url: {e}"))?;
        }

        anyhow::ensure!(
            !self.power_pool.contract_address.is_empty(),
            "POWER_CONTRACT_ADDRESS must be set"
        );
        anyhow::ensure!(self.power_pool.pool_id > 0, "POWER_POOL_ID must be set");
        anyhow::ensure!(
            !self.power_pool.base_asset.is_empty() && !self.power_pool.quote_asset.is_empty(),
            "POWER_POOL_BASE_ASSET and POWER_POOL_QUOTE_ASSET must be set"
        );
        anyhow::ensure!(!self.signer.address.is_empty(), "SIGNER_ADDRESS must be set");
        anyhow::ensure!(
            self.position.spread > Decimal::ZERO && self.position.spread < Decimal::ONE,
            "spread must be between 0 and 1, got {}",
            self.position.spread
        );
        anyhow::ensure!(
            self.position.tick_spacing > 0,
            "tick spacing must be positive"
        );
        anyhow::ensure!(
            self.position.default_token0_amount > 0 && self.position.default_token1_amount > 0,
            "default token amounts must be positive"
        );
        anyhow::ensure!(
            self.chain.query_timeout_secs > 0,
            "query timeout must be at least one second"
        );
        anyhow::ensure!(self.chain.event_buffer > 0, "event buffer must be positive");

        if self.submit_mode() == SubmitMode::Node {
            anyhow::ensure!(!self.signer.chain_id.is_empty(), "CHAIN_ID must be set");
            anyhow::ensure!(!self.signer.fees.is_empty(), "TX_FEES must be set to sign transactions");
            if self.signer.gas != "auto" {
                self.signer
                    .gas
                    .parse::<u64>()
                    .with_context(|| format!("TX_GAS={:?} is neither auto nor a limit", self.signer.gas))?;
            }
            anyhow::ensure!(
                self.signer.gas_adjustment >= 1.0,
                "TX_GAS_ADJUSTMENT must be at least 1.0"
            );
        }
        Ok(())
    }

    /// The slice of configuration the controller runs on.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            contract_address: self.power_pool.contract_address.clone(),
            pool: PoolRef::new(
                self.power_pool.pool_id,
                self.power_pool.base_asset.clone(),
                self.power_pool.quote_asset.clone(),
            ),
            owner: self.signer.address.clone(),
            spread: self.position.spread,
            tick_spacing: self.position.tick_spacing,
            defaults: Sizing {
                base: Coin::new(
                    self.power_pool.base_asset.clone(),
                    self.position.default_token0_amount,
                ),
                quote: Coin::new(
                    self.power_pool.quote_asset.clone(),
                    self.position.default_token1_amount,
                ),
            },
            query_timeout: self.query_timeout(),
            latency_summary_every: self.telemetry.latency_summary_every,
        }
    }
}
