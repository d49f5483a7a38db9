use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The canonical identity of an instrument: symbol plus exchange.
///
/// Serde keeps the two fields as a plain object; the `Display`/`FromStr`
/// pair renders the `"SYMBOL:EXCHANGE"` form used as a map key in the
/// persisted alert snapshot and in log output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolKey {
    pub symbol: String,
    pub exchange: String,
}

impl SymbolKey {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.exchange)
    }
}

impl FromStr for SymbolKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((symbol, exchange)) if !symbol.is_empty() && !exchange.is_empty() => {
                Ok(Self::new(symbol, exchange))
            }
            _ => Err(CoreError::InvalidSymbolKey(s.to_string())),
        }
    }
}

/// One inbound price/volume update for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub exchange: String,
    pub last_price: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// The interest-set key this tick routes under.
    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(self.symbol.clone(), self.exchange.clone())
    }
}

/// One open-high-low-close-volume interval sample, supplied by external
/// chart components and consumed by the indicator engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}
