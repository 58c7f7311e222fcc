//! Market lifecycle - ledger access and the unattended controller

mod controller;
mod ledger;

pub use controller::{
    market_question, strike_for, ControllerSettings, ControllerState, MarketController, TickAction,
};
pub use ledger::{EthLedger, Ledger};

#[cfg(test)]
pub use ledger::MockLedger;
