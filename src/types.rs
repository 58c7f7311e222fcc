//! Core types shared by the aggregator and the market controller
//!
//! Defines price points, published snapshots and the ledger's market record.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One sampled price, keyed by epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Timestamp in milliseconds
    pub time: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(time: i64, price: f64) -> Self {
        Self { time, price }
    }
}

/// Immutable view of the aggregator state.
///
/// A new snapshot always replaces the previous one wholesale. The series is
/// shared, so cloning a snapshot never copies points.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    /// Instantaneous (raw) price, if any has been observed
    pub price: Option<f64>,
    /// Smoothed samples, ascending by time
    pub series: Arc<[PricePoint]>,
}

impl PriceSnapshot {
    pub fn empty() -> Self {
        Self {
            price: None,
            series: Arc::from(Vec::new()),
        }
    }

    /// Most recent smoothed sample
    pub fn last_point(&self) -> Option<PricePoint> {
        self.series.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.series.is_empty()
    }
}

impl Default for PriceSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Market direction: which side of the strike makes the outcome true
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Above,
    Below,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Above
    }
}

impl Direction {
    /// Ledger encoding (`above` flag)
    pub fn is_above(&self) -> bool {
        matches!(self, Direction::Above)
    }

    pub fn from_above(above: bool) -> Self {
        if above {
            Direction::Above
        } else {
            Direction::Below
        }
    }

    /// Settlement rule. Ties count in favour of the market's direction.
    pub fn outcome(&self, price: f64, strike: u64) -> bool {
        let strike = strike as f64;
        match self {
            Direction::Above => price >= strike,
            Direction::Below => price <= strike,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Above => write!(f, "above"),
            Direction::Below => write!(f, "below"),
        }
    }
}

/// Market as stored on the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub id: u64,
    pub question: String,
    /// Decoded asset symbol (e.g. "ETH")
    pub asset: String,
    pub strike: u64,
    pub direction: Direction,
    /// Unix seconds
    pub resolve_time: u64,
    pub resolved: bool,
    pub outcome: bool,
}

impl MarketRecord {
    /// Whether the deadline has been reached at `now_secs`
    pub fn is_due(&self, now_secs: u64) -> bool {
        now_secs >= self.resolve_time
    }
}

/// Inputs of the open-market call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMarket {
    pub question: String,
    pub asset: String,
    pub strike: u64,
    pub direction: Direction,
    pub resolve_time: u64,
}

/// Encode an asset symbol as a right zero-padded `bytes32`
pub fn encode_symbol(symbol: &str) -> Result<[u8; 32]> {
    let bytes = symbol.as_bytes();
    if bytes.len() > 32 {
        bail!("Asset symbol '{}' exceeds 32 bytes", symbol);
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Decode a `bytes32` asset symbol, dropping the zero padding
pub fn decode_symbol(raw: &[u8; 32]) -> String {
    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    match std::str::from_utf8(&raw[..end]) {
        Ok(s) => s.to_string(),
        Err(_) => format!("0x{}", hex::encode(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_rule() {
        assert!(!Direction::Above.outcome(101.0, 106));
        assert!(Direction::Above.outcome(106.0, 106));
        assert!(Direction::Below.outcome(101.0, 106));
        assert!(!Direction::Below.outcome(106.5, 106));
    }

    #[test]
    fn test_symbol_padding() {
        let raw = encode_symbol("ETH").unwrap();
        assert_eq!(&raw[..3], b"ETH");
        assert!(raw[3..].iter().all(|b| *b == 0));
        assert_eq!(decode_symbol(&raw), "ETH");
    }

    #[test]
    fn test_symbol_too_long() {
        let long = "X".repeat(33);
        assert!(encode_symbol(&long).is_err());
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = PriceSnapshot::default();
        assert!(snap.is_empty());
        assert!(snap.last_point().is_none());
    }
}
