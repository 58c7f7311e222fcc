//! Price aggregator - turns the raw trade stream into a renderable series
//!
//! The aggregator task owns the sampler state. It reads the latest-price
//! register on a fixed cadence, optionally seeds itself from a one-shot
//! history fetch, and publishes a fresh [`PriceSnapshot`] on every tick
//! through a watch channel.

mod series;

pub use series::{Ema, PriceAggregator};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::feed::LatestPrice;
use crate::types::{PricePoint, PriceSnapshot};

/// Sampling parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    /// EMA smoothing factor
    pub ema_alpha: f64,
    /// Sampling cadence in milliseconds
    pub sample_interval_ms: u64,
    /// Minimum spacing between two recorded points
    pub min_point_gap_ms: i64,
    /// Rolling window duration
    pub window_ms: i64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            ema_alpha: 0.2,
            sample_interval_ms: 1000,
            min_point_gap_ms: 800,
            window_ms: 180_000,
        }
    }
}

/// Handle to a running aggregator task
pub struct AggregatorHandle {
    rx: watch::Receiver<PriceSnapshot>,
    task: JoinHandle<()>,
}

impl AggregatorHandle {
    /// New subscriber; sees the current snapshot immediately
    pub fn subscribe(&self) -> watch::Receiver<PriceSnapshot> {
        self.rx.clone()
    }

    /// Latest published snapshot
    pub fn latest(&self) -> PriceSnapshot {
        self.rx.borrow().clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Spawn the aggregator on the current runtime.
///
/// `history` is polled alongside the sample timer and applied once when it
/// resolves; pass `None` to start cold.
pub fn spawn_aggregator<H>(
    settings: AggregatorSettings,
    register: Arc<LatestPrice>,
    history: Option<H>,
) -> AggregatorHandle
where
    H: Future<Output = Vec<PricePoint>> + Send + 'static,
{
    let (tx, rx) = watch::channel(PriceSnapshot::empty());
    let task = tokio::spawn(run(settings, register, history, tx));
    AggregatorHandle { rx, task }
}

async fn run<H>(
    settings: AggregatorSettings,
    register: Arc<LatestPrice>,
    history: Option<H>,
    tx: watch::Sender<PriceSnapshot>,
) where
    H: Future<Output = Vec<PricePoint>> + Send + 'static,
{
    let mut aggregator = PriceAggregator::new(settings);

    let mut interval = tokio::time::interval(Duration::from_millis(settings.sample_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let history = async move {
        match history {
            Some(fetch) => Some(fetch.await),
            None => None,
        }
    };
    tokio::pin!(history);
    let mut history_done = false;

    tracing::info!(
        alpha = settings.ema_alpha,
        interval_ms = settings.sample_interval_ms,
        window_ms = settings.window_ms,
        "Price aggregator started"
    );

    loop {
        tokio::select! {
            points = &mut history, if !history_done => {
                history_done = true;
                let points = points.unwrap_or_default();
                if aggregator.seed(&points, now_ms(), !register.is_empty()) {
                    let _ = tx.send(aggregator.snapshot());
                } else {
                    tracing::debug!(points = points.len(), "History not used for seeding");
                }
            }
            _ = interval.tick() => {
                if let Some(snapshot) = aggregator.sample(now_ms(), register.get()) {
                    // no receivers is fine; the handle keeps one anyway
                    let _ = tx.send(snapshot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> AggregatorSettings {
        AggregatorSettings {
            sample_interval_ms: 10,
            min_point_gap_ms: 5,
            ..AggregatorSettings::default()
        }
    }

    #[tokio::test]
    async fn test_publishes_live_price() {
        let register = Arc::new(LatestPrice::with_price(101.0));
        let handle = spawn_aggregator(
            fast_settings(),
            register.clone(),
            None::<std::future::Ready<Vec<PricePoint>>>,
        );
        let mut rx = handle.subscribe();

        let snap = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                let snap = rx.borrow().clone();
                if snap.price.is_some() {
                    return snap;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(snap.price, Some(101.0));
        assert!(!snap.series.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_seeds_from_history_when_cold() {
        let register = Arc::new(LatestPrice::new());
        let history = async { vec![PricePoint::new(1_000, 42.0), PricePoint::new(2_000, 43.0)] };
        let handle = spawn_aggregator(fast_settings(), register, Some(history));
        let mut rx = handle.subscribe();

        let snap = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                let snap = rx.borrow().clone();
                if !snap.series.is_empty() {
                    return snap;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(snap.price, Some(43.0));
        assert_eq!(snap.series.first().unwrap().price, 42.0);
        handle.abort();
    }
}
