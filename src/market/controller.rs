//! Market controller - keeps exactly one market open and resolves it on time
//!
//! Every tick re-reads the current market from the ledger and derives its
//! decision from that fresh state, so a failed call is simply recomputed on
//! the next tick. Ticks never overlap: the run loop awaits each one fully.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::feed::LatestPrice;
use crate::market::Ledger;
use crate::types::{Direction, MarketRecord, NewMarket};

/// Controller parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub asset: String,
    pub direction: Direction,
    /// Market lifetime in seconds
    pub interval_secs: u64,
    /// Added to the live price to form the strike
    pub price_offset: f64,
    pub tick_interval_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            asset: "ETH".to_string(),
            direction: Direction::Above,
            interval_secs: 300,
            price_offset: 5.0,
            tick_interval_ms: 2000,
        }
    }
}

/// Lifecycle state of the current market
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    NoMarket,
    MarketOpen { id: u64 },
    PastDeadline { id: u64 },
    /// Transient: the next tick opens a replacement
    Resolved { id: u64 },
}

impl ControllerState {
    pub fn classify(record: &MarketRecord, now_secs: u64) -> Self {
        if record.resolved {
            ControllerState::Resolved { id: record.id }
        } else if record.is_due(now_secs) {
            ControllerState::PastDeadline { id: record.id }
        } else {
            ControllerState::MarketOpen { id: record.id }
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::NoMarket => write!(f, "NO_MARKET"),
            ControllerState::MarketOpen { id } => write!(f, "MARKET_OPEN(#{})", id),
            ControllerState::PastDeadline { id } => {
                write!(f, "MARKET_PAST_DEADLINE_UNRESOLVED(#{})", id)
            }
            ControllerState::Resolved { id } => write!(f, "MARKET_RESOLVED(#{})", id),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// No price observed yet
    NoPrice,
    Opened { id: u64, strike: u64 },
    Waiting { id: u64, resolve_time: u64 },
    Resolved { id: u64, outcome: bool },
}

/// Question text shown to bettors
pub fn market_question(asset: &str, direction: Direction, strike: u64, interval_secs: u64) -> String {
    let minutes = ((interval_secs as f64) / 60.0).round().max(1.0) as u64;
    format!(
        "Will {} be {} {} in {} minutes?",
        asset, direction, strike, minutes
    )
}

/// Strike for a new market: live price plus offset, rounded to a whole unit
pub fn strike_for(price: f64, offset: f64) -> Result<u64> {
    let strike = (price + offset).round();
    if !strike.is_finite() || strike < 0.0 || strike > u64::MAX as f64 {
        bail!("Cannot derive strike from price {} and offset {}", price, offset);
    }
    Ok(strike as u64)
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Unattended market lifecycle driver
pub struct MarketController<L> {
    ledger: L,
    register: Arc<LatestPrice>,
    settings: ControllerSettings,
    /// Newest market id; only meaningful once reconciled
    current: Option<u64>,
    reconciled: bool,
}

impl<L: Ledger> MarketController<L> {
    pub fn new(ledger: L, register: Arc<LatestPrice>, settings: ControllerSettings) -> Self {
        Self {
            ledger,
            register,
            settings,
            current: None,
            reconciled: false,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn current_market(&self) -> Option<u64> {
        self.current
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    /// Derive the market pointer from the ledger's id counter.
    ///
    /// Until this succeeds the controller takes no action, so a failed
    /// startup read can never be mistaken for "no market open".
    pub async fn reconcile(&mut self, now_secs: u64) -> Result<ControllerState> {
        let next = self
            .ledger
            .next_market_id()
            .await
            .context("Failed to read market counter")?;

        let state = match next.checked_sub(1) {
            None => {
                self.current = None;
                ControllerState::NoMarket
            }
            Some(id) => {
                let record = self
                    .ledger
                    .get_market(id)
                    .await
                    .with_context(|| format!("Failed to read market #{}", id))?;
                self.current = Some(id);
                ControllerState::classify(&record, now_secs)
            }
        };

        self.reconciled = true;
        tracing::info!(state = %state, next_market_id = next, "Market pointer reconciled");
        Ok(state)
    }

    /// Run one decision step. Issues at most one ledger write.
    pub async fn tick(&mut self, now_secs: u64) -> Result<TickAction> {
        if !self.reconciled {
            self.reconcile(now_secs).await?;
        }

        let Some(price) = self.register.get() else {
            return Ok(TickAction::NoPrice);
        };

        let Some(id) = self.current else {
            return self.open_market(price, now_secs).await;
        };

        let record = self
            .ledger
            .get_market(id)
            .await
            .with_context(|| format!("Failed to read market #{}", id))?;

        match ControllerState::classify(&record, now_secs) {
            ControllerState::NoMarket | ControllerState::Resolved { .. } => {
                self.open_market(price, now_secs).await
            }
            ControllerState::MarketOpen { id } => Ok(TickAction::Waiting {
                id,
                resolve_time: record.resolve_time,
            }),
            ControllerState::PastDeadline { id } => self.resolve_market(&record, id, price).await,
        }
    }

    async fn open_market(&mut self, price: f64, now_secs: u64) -> Result<TickAction> {
        let strike = strike_for(price, self.settings.price_offset)?;
        let market = NewMarket {
            question: market_question(
                &self.settings.asset,
                self.settings.direction,
                strike,
                self.settings.interval_secs,
            ),
            asset: self.settings.asset.clone(),
            strike,
            direction: self.settings.direction,
            resolve_time: now_secs + self.settings.interval_secs,
        };

        let assigned = match self.ledger.open_market(market.clone()).await {
            Ok(id) => id,
            Err(e) => {
                // The write may have landed anyway; re-derive the pointer from the counter.
                self.reconciled = false;
                return Err(e.context("open-market call failed"));
            }
        };

        // Pointer follows the ledger-reported id until the counter re-read confirms it.
        self.current = Some(assigned);

        let id = match self.ledger.next_market_id().await {
            Ok(next) => match next.checked_sub(1) {
                Some(id) => id,
                None => {
                    tracing::warn!(assigned = assigned, "Market counter still zero after open");
                    assigned
                }
            },
            Err(e) => {
                tracing::warn!(
                    assigned = assigned,
                    error = %format!("{:#}", e),
                    "Failed to re-read market counter, keeping assigned id"
                );
                assigned
            }
        };
        self.current = Some(id);

        tracing::info!(
            market_id = id,
            strike = strike,
            price = price,
            resolve_time = market.resolve_time,
            question = %market.question,
            "📈 Opened market"
        );

        Ok(TickAction::Opened { id, strike })
    }

    async fn resolve_market(&mut self, record: &MarketRecord, id: u64, price: f64) -> Result<TickAction> {
        let outcome = record.direction.outcome(price, record.strike);

        self.ledger
            .resolve_market(id, outcome)
            .await
            .with_context(|| format!("resolve-market call failed for #{}", id))?;

        tracing::info!(
            market_id = id,
            outcome = outcome,
            price = price,
            strike = record.strike,
            direction = %record.direction,
            "✅ Resolved market"
        );

        Ok(TickAction::Resolved { id, outcome })
    }

    /// Tick forever on a fixed cadence. Failures are logged and retried by
    /// the next tick from fresh ledger state.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.settings.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            asset = %self.settings.asset,
            interval_secs = self.settings.interval_secs,
            offset = self.settings.price_offset,
            tick_ms = self.settings.tick_interval_ms,
            "Market controller started"
        );

        loop {
            interval.tick().await;
            match self.tick(now_secs()).await {
                Ok(TickAction::NoPrice) => {
                    tracing::debug!("Waiting for first price");
                }
                Ok(action) => {
                    tracing::debug!(action = ?action, "Tick complete");
                }
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "Controller tick failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MockLedger;
    use mockall::predicate::eq;

    fn record(id: u64, strike: u64, resolve_time: u64, resolved: bool) -> MarketRecord {
        MarketRecord {
            id,
            question: "q".to_string(),
            asset: "ETH".to_string(),
            strike,
            direction: Direction::Above,
            resolve_time,
            resolved,
            outcome: false,
        }
    }

    #[test]
    fn test_question_text() {
        assert_eq!(
            market_question("ETH", Direction::Above, 106, 300),
            "Will ETH be above 106 in 5 minutes?"
        );
        assert_eq!(
            market_question("ETH", Direction::Below, 99, 20),
            "Will ETH be below 99 in 1 minutes?"
        );
    }

    #[test]
    fn test_strike_rounding() {
        assert_eq!(strike_for(101.0, 5.0).unwrap(), 106);
        assert_eq!(strike_for(100.6, 5.0).unwrap(), 106);
        assert!(strike_for(f64::NAN, 5.0).is_err());
        assert!(strike_for(1.0, -10.0).is_err());
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            ControllerState::classify(&record(3, 100, 1_000, false), 999),
            ControllerState::MarketOpen { id: 3 }
        );
        assert_eq!(
            ControllerState::classify(&record(3, 100, 1_000, false), 1_000),
            ControllerState::PastDeadline { id: 3 }
        );
        assert_eq!(
            ControllerState::classify(&record(3, 100, 1_000, true), 10),
            ControllerState::Resolved { id: 3 }
        );
    }

    #[tokio::test]
    async fn test_startup_read_failure_blocks_actions() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_next_market_id()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("rpc timeout")));
        ledger.expect_open_market().never();

        let register = Arc::new(LatestPrice::with_price(101.0));
        let mut controller = MarketController::new(ledger, register, ControllerSettings::default());

        assert!(controller.tick(1_000).await.is_err());
        assert!(!controller.is_reconciled());
        assert_eq!(controller.current_market(), None);
    }

    #[tokio::test]
    async fn test_failed_resolve_is_retried_with_same_outcome() {
        let mut ledger = MockLedger::new();
        ledger.expect_next_market_id().returning(|| Ok(8));
        ledger
            .expect_get_market()
            .with(eq(7))
            .returning(|id| Ok(record(id, 106, 1_000, false)));

        let mut attempts = 0;
        ledger
            .expect_resolve_market()
            .with(eq(7), eq(false))
            .times(2)
            .returning(move |_, _| {
                attempts += 1;
                if attempts == 1 {
                    Err(anyhow::anyhow!("execution reverted"))
                } else {
                    Ok(())
                }
            });
        ledger.expect_open_market().never();

        let register = Arc::new(LatestPrice::with_price(101.0));
        let mut controller = MarketController::new(ledger, register, ControllerSettings::default());

        assert!(controller.tick(1_300).await.is_err());
        let action = controller.tick(1_302).await.unwrap();
        assert_eq!(action, TickAction::Resolved { id: 7, outcome: false });
    }

    #[tokio::test]
    async fn test_counter_reread_failure_keeps_assigned_id() {
        let mut ledger = MockLedger::new();
        let mut reads = 0;
        ledger.expect_next_market_id().returning(move || {
            reads += 1;
            if reads == 1 {
                Ok(0)
            } else {
                Err(anyhow::anyhow!("rpc timeout"))
            }
        });
        ledger.expect_open_market().times(1).returning(|_| Ok(0));

        let register = Arc::new(LatestPrice::with_price(101.0));
        let mut controller = MarketController::new(ledger, register, ControllerSettings::default());

        let action = controller.tick(1_000).await.unwrap();
        assert_eq!(action, TickAction::Opened { id: 0, strike: 106 });
        assert_eq!(controller.current_market(), Some(0));
    }
}
