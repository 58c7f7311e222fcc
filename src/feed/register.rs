//! Latest-price register

use std::sync::atomic::{AtomicU64, Ordering};

/// Bit pattern marking an empty register. Stored prices are always finite,
/// so a NaN can never collide with a real value.
const EMPTY: u64 = 0x7ff8_0000_0000_dead;

/// Single-writer register for the last observed trade price.
///
/// The stream reader is the only writer; the sampler and the controller tick
/// read it. Each access is one atomic load or store, so readers always see a
/// whole value.
#[derive(Debug)]
pub struct LatestPrice {
    bits: AtomicU64,
}

impl LatestPrice {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(EMPTY),
        }
    }

    /// Register pre-loaded with a price (handy for tests and replays)
    pub fn with_price(price: f64) -> Self {
        let register = Self::new();
        register.set(price);
        register
    }

    /// Store a price. Non-finite values are ignored.
    pub fn set(&self, price: f64) {
        if price.is_finite() {
            self.bits.store(price.to_bits(), Ordering::Release);
        }
    }

    pub fn get(&self) -> Option<f64> {
        match self.bits.load(Ordering::Acquire) {
            EMPTY => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.get().is_none()
    }
}

impl Default for LatestPrice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_starts_empty() {
        let register = LatestPrice::new();
        assert!(register.is_empty());
        assert_eq!(register.get(), None);
    }

    #[test]
    fn test_register_keeps_last_value() {
        let register = LatestPrice::new();
        register.set(3012.5);
        register.set(3013.25);
        assert_eq!(register.get(), Some(3013.25));
    }

    #[test]
    fn test_register_ignores_non_finite() {
        let register = LatestPrice::with_price(101.0);
        register.set(f64::NAN);
        register.set(f64::INFINITY);
        assert_eq!(register.get(), Some(101.0));
    }
}
