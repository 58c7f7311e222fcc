//! Arena Oracle Library
//!
//! Price aggregation and unattended market lifecycle control for recurring,
//! time-boxed prediction markets settled against a live trade feed.

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod logging;
pub mod market;
pub mod types;
