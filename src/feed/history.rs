//! One-shot candle history used to seed the rolling window on cold start
//!
//! The endpoint returns kline tuples:
//! `[open_time, open, high, low, close, volume, close_time, ...]`

use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

use crate::types::PricePoint;

const CLOSE_IDX: usize = 4;
const CLOSE_TIME_IDX: usize = 6;
const USER_AGENT: &str = concat!("arena-oracle/", env!("CARGO_PKG_VERSION"));

/// Binance-style endpoints, tried in order
pub const DEFAULT_HISTORY_URLS: &[&str] = &[
    "https://api.binance.com/api/v3/klines?symbol=ETHUSDT&interval=1s&limit=180",
    "https://data-api.binance.vision/api/v3/klines?symbol=ETHUSDT&interval=1s&limit=180",
];

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Convert a kline payload into price points (close time, close price).
///
/// Anything other than a non-empty array yields an empty series; malformed
/// rows are skipped. The result is sorted by time.
pub fn parse_klines(payload: &Value) -> Vec<PricePoint> {
    let Some(rows) = payload.as_array() else {
        return Vec::new();
    };

    let mut points: Vec<PricePoint> = rows
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            if row.len() <= CLOSE_TIME_IDX {
                return None;
            }
            let price = value_as_f64(&row[CLOSE_IDX])?;
            let time = value_as_i64(&row[CLOSE_TIME_IDX])?;
            price.is_finite().then_some(PricePoint { time, price })
        })
        .collect();

    points.sort_by_key(|p| p.time);
    points
}

/// Fetch the history from the first endpoint that answers with success.
///
/// Transport errors and non-2xx statuses move on to the next URL; when every
/// URL fails, the result is an empty series rather than an error.
pub async fn fetch_history(urls: &[String], timeout: Duration) -> Vec<PricePoint> {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create HTTP client for price history");
            return Vec::new();
        }
    };

    for url in urls {
        match fetch_one(&client, url).await {
            Ok(points) if !points.is_empty() => {
                tracing::info!(count = points.len(), "✅ Price history fetched");
                return points;
            }
            Ok(_) => {
                tracing::warn!(url = %short_url(url), "Price history response was empty or not an array");
            }
            Err(e) => {
                tracing::warn!(url = %short_url(url), error = %e, "Price history fetch failed");
            }
        }
    }

    tracing::warn!("No price history available, starting with an empty series");
    Vec::new()
}

async fn fetch_one(client: &reqwest::Client, url: &str) -> Result<Vec<PricePoint>> {
    tracing::info!(url = %short_url(url), "📥 Fetching price history...");

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .context("Failed to fetch price history")?;

    if !response.status().is_success() {
        anyhow::bail!("History endpoint returned {}", response.status());
    }

    let payload: Value = response
        .json()
        .await
        .context("Failed to parse price history response")?;

    Ok(parse_klines(&payload))
}

fn short_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_klines_uses_close_and_close_time() {
        let payload = json!([
            [1000, "1.0", "2.0", "0.5", "1.5", "10", 1999, "x"],
            [2000, "1.5", "2.5", "1.0", "2.25", "10", 2999, "x"]
        ]);
        let points = parse_klines(&payload);
        assert_eq!(points, vec![PricePoint::new(1999, 1.5), PricePoint::new(2999, 2.25)]);
    }

    #[test]
    fn test_parse_klines_sorts_and_skips_bad_rows() {
        let payload = json!([
            [2000, "1", "1", "1", "3.0", "1", 2999],
            [0, "1", "1", "1", "nope", "1", 999],
            [0, "1"],
            "garbage",
            [1000, "1", "1", "1", 2.0, "1", 1999]
        ]);
        let points = parse_klines(&payload);
        assert_eq!(points, vec![PricePoint::new(1999, 2.0), PricePoint::new(2999, 3.0)]);
    }

    #[test]
    fn test_parse_klines_non_array() {
        assert!(parse_klines(&json!({"code": -1121, "msg": "Invalid symbol."})).is_empty());
        assert!(parse_klines(&json!([])).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_history_unreachable_is_empty() {
        let urls = vec!["http://127.0.0.1:9/klines".to_string()];
        let points = fetch_history(&urls, Duration::from_millis(200)).await;
        assert!(points.is_empty());
    }
}
