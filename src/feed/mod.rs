//! Price feed - streaming trade client shared by both processes
//!
//! Connects to a public trade stream, keeps the latest trade price in a
//! lock-free register, and fetches a one-shot candle history for cold starts.

pub mod history;
mod reconnect;
mod register;
mod stream;

pub use history::{fetch_history, parse_klines};
pub use reconnect::{FixedDelay, ReconnectPolicy};
pub use register::LatestPrice;
pub use stream::{parse_trade_price, TradeStream};
