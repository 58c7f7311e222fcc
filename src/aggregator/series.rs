//! Smoothing and rolling-window sampling
//!
//! Pure state: every operation takes `now_ms` explicitly so the sampling
//! rules can be exercised without timers.

use std::sync::Arc;

use crate::aggregator::AggregatorSettings;
use crate::types::{PricePoint, PriceSnapshot};

/// Exponential moving average with a fixed smoothing factor
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Start from a known average
    pub fn seeded(alpha: f64, value: f64) -> Self {
        Self {
            alpha,
            value: Some(value),
        }
    }

    /// Fold in a raw value. The first update adopts the raw value.
    pub fn update(&mut self, raw: f64) -> f64 {
        let previous = self.value.unwrap_or(raw);
        let next = raw * self.alpha + previous * (1.0 - self.alpha);
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset_to(&mut self, value: f64) {
        self.value = Some(value);
    }
}

/// Sampler state owned by the aggregator task
#[derive(Debug)]
pub struct PriceAggregator {
    settings: AggregatorSettings,
    ema: Ema,
    /// Published series; shared with every snapshot handed out
    series: Arc<[PricePoint]>,
    /// Last price published as instantaneous
    price: Option<f64>,
    /// Raw price adopted from history, used until a live tick lands
    seed_price: Option<f64>,
    seeded: bool,
    live_seen: bool,
}

impl PriceAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            ema: Ema::new(settings.ema_alpha),
            settings,
            series: Arc::from(Vec::new()),
            price: None,
            seed_price: None,
            seeded: false,
            live_seen: false,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema.value()
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            price: self.price,
            series: Arc::clone(&self.series),
        }
    }

    /// Seed the window from a historical series.
    ///
    /// The series is shifted so its newest point lands on `now_ms`, then cut
    /// to the window. Happens at most once, and never after a live tick.
    /// Returns whether the seed was adopted.
    pub fn seed(&mut self, history: &[PricePoint], now_ms: i64, live_seen: bool) -> bool {
        self.live_seen |= live_seen;
        if self.seeded || self.live_seen || history.is_empty() {
            return false;
        }

        let mut sorted = history.to_vec();
        sorted.sort_by_key(|p| p.time);
        let Some(newest) = sorted.last().copied() else {
            return false;
        };

        let offset = now_ms - newest.time;
        let cutoff = now_ms - self.settings.window_ms;
        let shifted: Vec<PricePoint> = sorted
            .iter()
            .map(|p| PricePoint::new(p.time + offset, p.price))
            .filter(|p| p.time >= cutoff)
            .collect();

        // The newest point always lands on `now`, so the window is never empty.
        let last_price = shifted.last().map_or(newest.price, |p| p.price);

        self.seeded = true;
        self.seed_price = Some(last_price);
        self.price = Some(last_price);
        self.ema.reset_to(last_price);
        self.series = Arc::from(shifted);

        tracing::info!(
            points = self.series.len(),
            price = last_price,
            "🌱 Seeded price window from history"
        );
        true
    }

    /// Run one sampling step.
    ///
    /// `raw` is the live register value. Returns the snapshot to publish, or
    /// `None` while no price is known at all.
    pub fn sample(&mut self, now_ms: i64, raw: Option<f64>) -> Option<PriceSnapshot> {
        if raw.is_some() {
            self.live_seen = true;
            self.seed_price = None;
        }
        let raw = raw.or(self.seed_price)?;
        self.price = Some(raw);

        if let Some(last) = self.series.last() {
            if now_ms - last.time < self.settings.min_point_gap_ms {
                return Some(self.snapshot());
            }
        }

        let ema = self.ema.update(raw);
        let cutoff = now_ms - self.settings.window_ms;
        let next: Vec<PricePoint> = self
            .series
            .iter()
            .copied()
            .filter(|p| p.time >= cutoff)
            .chain(std::iter::once(PricePoint::new(now_ms, ema)))
            .collect();
        self.series = Arc::from(next);

        Some(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn aggregator() -> PriceAggregator {
        PriceAggregator::new(AggregatorSettings::default())
    }

    #[test]
    fn test_ema_sequence() {
        let mut ema = Ema::seeded(0.2, 100.0);
        let values: Vec<f64> = [100.0, 110.0, 120.0].iter().map(|r| ema.update(*r)).collect();
        assert!((values[0] - 100.0).abs() < 1e-9);
        assert!((values[1] - 102.0).abs() < 1e-9);
        assert!((values[2] - 105.6).abs() < 1e-9);
    }

    #[test]
    fn test_ema_first_update_adopts_raw() {
        let mut ema = Ema::new(0.2);
        assert_eq!(ema.value(), None);
        assert_eq!(ema.update(250.0), 250.0);
    }

    #[test]
    fn test_no_price_no_snapshot() {
        let mut agg = aggregator();
        assert!(agg.sample(T0, None).is_none());
        assert!(agg.snapshot().is_empty());
    }

    #[test]
    fn test_sample_appends_smoothed_point() {
        let mut agg = aggregator();
        agg.sample(T0, Some(100.0)).unwrap();
        let snap = agg.sample(T0 + 1000, Some(110.0)).unwrap();

        assert_eq!(snap.price, Some(110.0));
        assert_eq!(snap.series.len(), 2);
        assert!((snap.series[1].price - 102.0).abs() < 1e-9);
        assert_eq!(snap.series[1].time, T0 + 1000);
    }

    #[test]
    fn test_debounce_keeps_series() {
        let mut agg = aggregator();
        let first = agg.sample(T0, Some(100.0)).unwrap();
        let second = agg.sample(T0 + 799, Some(105.0)).unwrap();

        assert_eq!(second.series.len(), first.series.len());
        assert!(Arc::ptr_eq(&first.series, &second.series));
        // raw price still moves
        assert_eq!(second.price, Some(105.0));
        // the debounced value did not touch the average
        assert_eq!(agg.ema(), Some(100.0));

        let third = agg.sample(T0 + 800, Some(105.0)).unwrap();
        assert_eq!(third.series.len(), 2);
    }

    #[test]
    fn test_window_eviction_and_order() {
        let mut agg = aggregator();
        let window = agg.settings().window_ms;
        let mut now = T0;
        for i in 0..400 {
            agg.sample(now, Some(100.0 + i as f64));
            now += 1000;
        }
        let last_now = now - 1000;
        let snap = agg.snapshot();

        assert!(snap.series.iter().all(|p| p.time >= last_now - window));
        assert!(snap.series.windows(2).all(|w| w[0].time < w[1].time));
        assert_eq!(snap.series.len(), 181);
    }

    #[test]
    fn test_seed_shifts_history_to_now() {
        let mut agg = aggregator();
        let history: Vec<PricePoint> = (0..10)
            .map(|i| PricePoint::new(1_000 + i * 1_000, 3000.0 + i as f64))
            .collect();

        assert!(agg.seed(&history, T0, false));
        let snap = agg.snapshot();
        assert_eq!(snap.series.len(), 10);
        assert_eq!(snap.last_point().unwrap().time, T0);
        assert_eq!(snap.price, Some(3009.0));
        assert_eq!(agg.ema(), Some(3009.0));
    }

    #[test]
    fn test_seed_filters_to_window() {
        let mut agg = aggregator();
        // 10 minutes of history, one point per minute
        let history: Vec<PricePoint> = (0..10)
            .map(|i| PricePoint::new(i * 60_000, 100.0))
            .collect();

        assert!(agg.seed(&history, T0, false));
        assert_eq!(agg.snapshot().series.len(), 4);
    }

    #[test]
    fn test_seed_at_most_once() {
        let mut agg = aggregator();
        let history = vec![PricePoint::new(1_000, 10.0)];
        assert!(agg.seed(&history, T0, false));
        assert!(!agg.seed(&[PricePoint::new(2_000, 20.0)], T0 + 10, false));
        assert_eq!(agg.snapshot().price, Some(10.0));
    }

    #[test]
    fn test_seed_ignored_after_live_tick() {
        let mut agg = aggregator();
        agg.sample(T0, Some(100.0));

        let history = vec![PricePoint::new(1_000, 10.0)];
        assert!(!agg.seed(&history, T0 + 5_000, false));
        assert_eq!(agg.snapshot().series.len(), 1);
        assert!(!agg.is_seeded());
    }

    #[test]
    fn test_seed_refused_when_register_already_live() {
        let mut agg = aggregator();
        assert!(!agg.seed(&[PricePoint::new(1_000, 10.0)], T0, true));
        assert!(agg.snapshot().is_empty());
    }

    #[test]
    fn test_seed_price_used_until_live_tick() {
        let mut agg = aggregator();
        agg.seed(&[PricePoint::new(1_000, 50.0)], T0, false);

        let snap = agg.sample(T0 + 1_000, None).unwrap();
        assert_eq!(snap.price, Some(50.0));
        assert_eq!(snap.series.len(), 2);

        let snap = agg.sample(T0 + 2_000, Some(60.0)).unwrap();
        assert_eq!(snap.price, Some(60.0));
        assert!((snap.last_point().unwrap().price - 52.0).abs() < 1e-9);

        // later seeds have no effect once live data arrived
        assert!(!agg.seed(&[PricePoint::new(9_000, 1.0)], T0 + 3_000, false));
    }
}
