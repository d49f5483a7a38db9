//! The alert data model and its persisted snapshot format.
//!
//! Price and indicator alerts are an explicit tagged union rather than
//! one loosely-typed record discriminated by which optional fields happen
//! to be present; each variant carries only its own fields.

use chrono::{DateTime, Utc};
use core_types::SymbolKey;
use indicators::IndicatorKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Which crossings a price alert fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceCondition {
    /// Either direction.
    Crossing,
    CrossingUp,
    CrossingDown,
}

/// How often an indicator alert may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerFrequency {
    /// Marked triggered after the first fire; excluded from evaluation
    /// until the UI resets it.
    OncePerBar,
    /// Stays active and may fire again on a later qualifying tick.
    EveryTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Triggered,
    Paused,
}

/// A one-shot threshold-crossing alert. Removed from the store when it
/// triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub id: Uuid,
    pub symbol: String,
    pub exchange: String,
    pub threshold: Decimal,
    pub condition: PriceCondition,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

impl PriceAlert {
    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(self.symbol.clone(), self.exchange.clone())
    }
}

/// What an indicator condition compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorComparison {
    /// The indicator value crossed above the condition value between the
    /// previous and current computation.
    CrossesAbove,
    /// The indicator value crossed below the condition value.
    CrossesBelow,
    /// Plain threshold comparison; the subject may be the indicator
    /// value or the current price.
    GreaterThan,
    LessThan,
}

/// The left-hand side of a threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonSubject {
    IndicatorValue,
    LastPrice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorCondition {
    pub comparison: IndicatorComparison,
    pub subject: ComparisonSubject,
    pub value: Decimal,
}

/// An alert on a computed indicator value. Mutated in place (status
/// flag) rather than removed when it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorAlert {
    pub id: Uuid,
    pub symbol: String,
    pub exchange: String,
    pub indicator: IndicatorKind,
    pub interval: String,
    pub condition: IndicatorCondition,
    pub frequency: TriggerFrequency,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

impl IndicatorAlert {
    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(self.symbol.clone(), self.exchange.clone())
    }
}

/// Either kind of alert, discriminated explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    Price(PriceAlert),
    Indicator(IndicatorAlert),
}

impl Alert {
    pub fn id(&self) -> Uuid {
        match self {
            Alert::Price(a) => a.id,
            Alert::Indicator(a) => a.id,
        }
    }

    pub fn key(&self) -> SymbolKey {
        match self {
            Alert::Price(a) => a.key(),
            Alert::Indicator(a) => a.key(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Alert::Price(a) => a.created_at,
            Alert::Indicator(a) => a.created_at,
        }
    }
}

/// The persisted shape: price alerts partitioned by `"SYMBOL:EXCHANGE"`
/// key, indicator alerts as a flat list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertSnapshot {
    #[serde(default)]
    pub price_alerts: HashMap<String, Vec<PriceAlert>>,
    #[serde(default)]
    pub indicator_alerts: Vec<IndicatorAlert>,
}

impl AlertSnapshot {
    pub fn is_empty(&self) -> bool {
        self.price_alerts.values().all(|v| v.is_empty()) && self.indicator_alerts.is_empty()
    }
}
