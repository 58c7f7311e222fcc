//! Configuration management for the arena oracle
//!
//! Loads defaults, optional config files, `ARENA__*` environment variables
//! and the flat variables used by existing deployments (`STREAM_URL`,
//! `MARKET_INTERVAL_SEC`, `PRICE_OFFSET`). Ledger credentials are read from
//! the environment only.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use ethers::types::Address;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::aggregator::AggregatorSettings;
use crate::feed::history::DEFAULT_HISTORY_URLS;
use crate::market::ControllerSettings;
use crate::types::Direction;

pub const RPC_URL_VAR: &str = "RPC_URL";
pub const PRIVATE_KEY_VAR: &str = "PRIVATE_KEY";
pub const CONTRACT_ADDRESS_VAR: &str = "CONTRACT_ADDRESS";

/// Fatal startup failures
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub aggregator: AggregatorConfig,
    pub controller: ControllerConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Trade stream WebSocket URL
    pub stream_url: String,
    /// Flat reconnect delay in milliseconds
    pub reconnect_delay_ms: u64,
    /// Candle history endpoints, tried in order
    pub history_urls: Vec<String>,
    /// Per-request timeout for the history fetch
    pub history_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    pub ema_alpha: f64,
    pub sample_interval_ms: u64,
    pub min_point_gap_ms: i64,
    pub window_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Asset symbol written to the ledger
    pub asset: String,
    /// Market lifetime in seconds
    pub interval_secs: u64,
    /// Added to the live price to form the strike
    pub price_offset: f64,
    /// Tick cadence in milliseconds
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Chain id override; read from the RPC when absent
    pub chain_id: Option<u64>,
}

/// Connection and signing parameters for the ledger
#[derive(Clone)]
pub struct LedgerCredentials {
    pub rpc_url: String,
    private_key: String,
    pub contract_address: Address,
}

impl LedgerCredentials {
    pub fn new(rpc_url: String, private_key: String, contract_address: Address) -> Self {
        Self {
            rpc_url,
            private_key,
            contract_address,
        }
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Read and validate credentials from the process environment
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(CredentialError::Missing(var))
        };

        let rpc_url = get(RPC_URL_VAR)?;
        let private_key = get(PRIVATE_KEY_VAR)?;
        let contract = get(CONTRACT_ADDRESS_VAR)?;

        if !private_key.starts_with("0x") || private_key.len() != 66 {
            return Err(CredentialError::Invalid {
                var: PRIVATE_KEY_VAR,
                reason: "must be a hex string with 0x prefix (66 chars total)".to_string(),
            });
        }

        let contract_address = contract
            .parse::<Address>()
            .map_err(|e| CredentialError::Invalid {
                var: CONTRACT_ADDRESS_VAR,
                reason: e.to_string(),
            })?;

        Ok(Self::new(rpc_url, private_key, contract_address))
    }
}

impl fmt::Debug for LedgerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerCredentials")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("contract_address", &self.contract_address)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from defaults, files and environment.
    ///
    /// `.env` is expected to be loaded by the caller beforehand.
    pub fn load() -> Result<Self> {
        let history_urls: Vec<&str> = DEFAULT_HISTORY_URLS.to_vec();

        let config = Config::builder()
            // Feed defaults
            .set_default("feed.stream_url", "wss://stream.binance.com:9443/ws/ethusdt@trade")?
            .set_default("feed.reconnect_delay_ms", 1000)?
            .set_default("feed.history_urls", history_urls)?
            .set_default("feed.history_timeout_ms", 8000)?
            // Aggregator defaults
            .set_default("aggregator.ema_alpha", 0.2)?
            .set_default("aggregator.sample_interval_ms", 1000)?
            .set_default("aggregator.min_point_gap_ms", 800)?
            .set_default("aggregator.window_ms", 180_000)?
            // Controller defaults
            .set_default("controller.asset", "ETH")?
            .set_default("controller.interval_secs", 300)?
            .set_default("controller.price_offset", 5.0)?
            .set_default("controller.tick_interval_ms", 2000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ARENA__*)
            .add_source(Environment::with_prefix("ARENA").separator("__"))
            // Flat variables win over everything else
            .set_override_option("feed.stream_url", std::env::var("STREAM_URL").ok())?
            .set_override_option(
                "controller.interval_secs",
                std::env::var("MARKET_INTERVAL_SEC").ok(),
            )?
            .set_override_option("controller.price_offset", std::env::var("PRICE_OFFSET").ok())?
            .set_override_option("ledger.chain_id", std::env::var("CHAIN_ID").ok())?
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Sanity checks that would otherwise surface as odd runtime behaviour
    pub fn validate(&self) -> Result<()> {
        if !(self.aggregator.ema_alpha > 0.0 && self.aggregator.ema_alpha <= 1.0) {
            anyhow::bail!("aggregator.ema_alpha must be in (0, 1]");
        }
        if self.aggregator.sample_interval_ms == 0 || self.controller.tick_interval_ms == 0 {
            anyhow::bail!("sample and tick intervals must be non-zero");
        }
        if self.aggregator.window_ms <= 0 {
            anyhow::bail!("aggregator.window_ms must be positive");
        }
        if self.controller.interval_secs == 0 {
            anyhow::bail!("controller.interval_secs must be non-zero");
        }
        if !self.controller.price_offset.is_finite() {
            anyhow::bail!("controller.price_offset must be finite");
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "stream={} asset={} interval={}s offset={} tick={}ms window={}ms",
            self.feed.stream_url,
            self.controller.asset,
            self.controller.interval_secs,
            self.controller.price_offset,
            self.controller.tick_interval_ms,
            self.aggregator.window_ms
        )
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.feed.reconnect_delay_ms)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.feed.history_timeout_ms)
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest())
    }
}

impl From<&AggregatorConfig> for AggregatorSettings {
    fn from(cfg: &AggregatorConfig) -> Self {
        Self {
            ema_alpha: cfg.ema_alpha,
            sample_interval_ms: cfg.sample_interval_ms,
            min_point_gap_ms: cfg.min_point_gap_ms,
            window_ms: cfg.window_ms,
        }
    }
}

impl From<&ControllerConfig> for ControllerSettings {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            asset: cfg.asset.clone(),
            direction: Direction::Above,
            interval_secs: cfg.interval_secs,
            price_offset: cfg.price_offset,
            tick_interval_ms: cfg.tick_interval_ms,
        }
    }
}
