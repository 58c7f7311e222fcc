//! Trade stream WebSocket client
//!
//! Subscribes by URL (e.g. `wss://stream.binance.com:9443/ws/ethusdt@trade`)
//! and feeds every trade price into a [`LatestPrice`] register.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::feed::{FixedDelay, LatestPrice, ReconnectPolicy};

/// Trade payload. Only the last-trade price is used.
#[derive(Debug, Deserialize)]
struct TradeMessage {
    #[serde(default)]
    p: Option<Value>,
}

/// Extract the last-trade price from a raw stream frame.
///
/// Returns `None` for anything that is not a JSON object with a usable `p`.
pub fn parse_trade_price(text: &str) -> Option<f64> {
    let msg: TradeMessage = serde_json::from_str(text).ok()?;
    let price = match msg.p? {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Streaming client owning the socket and the writer side of the register
pub struct TradeStream {
    url: String,
    policy: Box<dyn ReconnectPolicy>,
}

impl TradeStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_policy(url, FixedDelay::default())
    }

    pub fn with_policy(url: impl Into<String>, policy: impl ReconnectPolicy + 'static) -> Self {
        Self {
            url: url.into(),
            policy: Box::new(policy),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawn the reader on the current runtime
    pub fn spawn(self, register: Arc<LatestPrice>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(register))
    }

    /// Connect, read, and reconnect for the lifetime of the process
    pub async fn run(mut self, register: Arc<LatestPrice>) {
        let mut attempt = 0u32;

        loop {
            tracing::info!(url = %self.url, attempt = attempt, "Connecting to trade stream...");

            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    attempt = 0;
                    self.policy.reset();
                    tracing::info!(url = %self.url, "✅ Connected to trade stream");

                    let (mut write, mut read) = ws_stream.split();
                    let mut accepted = 0u64;
                    let mut dropped = 0u64;

                    loop {
                        match read.next().await {
                            Some(Ok(Message::Text(text))) => match parse_trade_price(&text) {
                                Some(price) => {
                                    register.set(price);
                                    accepted += 1;
                                }
                                None => {
                                    dropped += 1;
                                    tracing::trace!(frame = %text, "Dropping malformed trade frame");
                                }
                            },
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::warn!(close = ?frame, "Trade stream closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!(error = %e, "Trade stream error");
                                break;
                            }
                            None => {
                                tracing::warn!("Trade stream ended");
                                break;
                            }
                        }
                    }

                    let _ = write.close().await;
                    tracing::info!(accepted = accepted, dropped = dropped, "Trade stream disconnected");
                }
                Err(e) => {
                    tracing::error!(url = %self.url, error = %e, "Trade stream connection failed");
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.policy.next_delay(attempt);
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = attempt,
                "🔄 Reconnecting to trade stream"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
