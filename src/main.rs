//! Market oracle process
//!
//! Streams the live trade price into a register and drives the market
//! controller against the ledger. Exits with status 1 when configuration or
//! credentials are missing; otherwise runs until terminated.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use arena_oracle::config::{AppConfig, LedgerCredentials};
use arena_oracle::feed::{FixedDelay, LatestPrice, TradeStream};
use arena_oracle::logging::init_logging;
use arena_oracle::market::{ControllerSettings, EthLedger, MarketController};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let cfg = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Invalid configuration");
            std::process::exit(1);
        }
    };

    let credentials = match LedgerCredentials::from_env() {
        Ok(credentials) => credentials,
        Err(e) => {
            error!(error = %e, "Missing ledger credentials (RPC_URL, PRIVATE_KEY, CONTRACT_ADDRESS)");
            std::process::exit(1);
        }
    };

    info!(config = %cfg, "Arena oracle starting");

    let register = Arc::new(LatestPrice::new());
    let stream = TradeStream::with_policy(cfg.feed.stream_url.clone(), FixedDelay::new(cfg.reconnect_delay()));
    let stream_task = stream.spawn(register.clone());

    let retry_delay = Duration::from_millis(cfg.controller.tick_interval_ms);
    let ledger = loop {
        match EthLedger::connect(&credentials, cfg.ledger.chain_id).await {
            Ok(ledger) => break ledger,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Ledger unavailable, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }
    };

    let controller = MarketController::new(ledger, register, ControllerSettings::from(&cfg.controller));

    tokio::select! {
        _ = controller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    stream_task.abort();
}
