//! Price feed host
//!
//! Runs the trade stream and the aggregator, seeds the window from candle
//! history on cold start and logs every published snapshot.

use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use arena_oracle::aggregator::{spawn_aggregator, AggregatorSettings};
use arena_oracle::config::AppConfig;
use arena_oracle::feed::{fetch_history, FixedDelay, LatestPrice, TradeStream};
use arena_oracle::logging::init_logging;

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

    info!(config = %cfg, "Price feed starting");

    let register = Arc::new(LatestPrice::new());
    let stream = TradeStream::with_policy(cfg.feed.stream_url.clone(), FixedDelay::new(cfg.reconnect_delay()));
    let stream_task = stream.spawn(register.clone());

    let urls = cfg.feed.history_urls.clone();
    let timeout = cfg.history_timeout();
    let history = async move { fetch_history(&urls, timeout).await };

    let handle = spawn_aggregator(AggregatorSettings::from(&cfg.aggregator), register, Some(history));
    let mut updates = WatchStream::new(handle.subscribe());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(snapshot) = update else { break };
                info!(
                    price = ?snapshot.price,
                    smoothed = ?snapshot.last_point().map(|p| p.price),
                    points = snapshot.series.len(),
                    "Price snapshot"
                );
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    handle.abort();
    stream_task.abort();
}
