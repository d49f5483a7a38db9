//! Stateful threshold-crossing detection.
//!
//! A crossing exists only between two observed prices. The evaluator
//! therefore tracks, per alert, which side of the threshold the price was
//! last seen on, and reports a crossing only when a tick lands strictly
//! on the other side. The very first tick for a symbol can never fire:
//! with no previous price there is no movement to classify.

use core_types::SymbolKey;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Which way the price moved through the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Above,
    Below,
}

/// Tracks per-alert threshold positions and per-symbol last prices.
///
/// One evaluator instance serves every price alert in the store; entries
/// for removed alerts must be dropped through [`CrossingEvaluator::forget`]
/// so a re-created alert with the same id starts fresh.
#[derive(Debug, Default)]
pub struct CrossingEvaluator {
    last_price: HashMap<SymbolKey, Decimal>,
    positions: HashMap<Uuid, Position>,
}

impl CrossingEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `price` as the latest observation for `key`. Call once per
    /// tick, after evaluating every alert on the symbol with
    /// [`CrossingEvaluator::observe`].
    pub fn record_price(&mut self, key: &SymbolKey, price: Decimal) {
        self.last_price.insert(key.clone(), price);
    }

    /// Evaluates one alert against the current tick price and reports a
    /// crossing, if any.
    ///
    /// An alert seen for the first time has its position derived from the
    /// symbol's previous price (ties count as above), then the current
    /// tick is evaluated against that derived position in the same call.
    /// If the symbol itself has never been seen, the position cannot be
    /// derived and nothing fires.
    pub fn observe(&mut self, alert_id: Uuid, key: &SymbolKey, threshold: Decimal, price: Decimal) -> Option<Crossing> {
        let position = match self.positions.get(&alert_id) {
            Some(p) => *p,
            None => {
                let prev = *self.last_price.get(key)?;
                let derived = if prev >= threshold { Position::Above } else { Position::Below };
                self.positions.insert(alert_id, derived);
                derived
            }
        };

        let crossing = match position {
            Position::Below if price > threshold => Some(Crossing::Up),
            Position::Above if price < threshold => Some(Crossing::Down),
            _ => None,
        };

        // A tick exactly on the threshold leaves the position unchanged;
        // only a strict move to the other side flips it.
        if price > threshold {
            self.positions.insert(alert_id, Position::Above);
        } else if price < threshold {
            self.positions.insert(alert_id, Position::Below);
        }

        crossing
    }

    /// Drops tracked state for an alert that was removed or triggered.
    pub fn forget(&mut self, alert_id: Uuid) {
        self.positions.remove(&alert_id);
    }

    /// Drops tracked state for every alert not in `live`. Called after a
    /// store refresh so externally removed alerts do not accumulate.
    pub fn retain_alerts(&mut self, live: &std::collections::HashSet<Uuid>) {
        self.positions.retain(|id, _| live.contains(id));
    }

    /// Number of alerts with tracked positions.
    pub fn tracked(&self) -> usize {
        self.positions.len()
    }
}
