use chrono::{DateTime, Utc};
use core_types::SymbolKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the threshold the price moved to when it crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerDirection {
    Up,
    Down,
}

/// Payload for a price alert that crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTrigger {
    pub alert_id: Uuid,
    pub key: SymbolKey,
    pub threshold: Decimal,
    pub direction: TriggerDirection,
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// Payload for an indicator alert whose condition matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorTrigger {
    pub alert_id: Uuid,
    pub key: SymbolKey,
    pub indicator: String,
    pub interval: String,
    pub value: Decimal,
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// The top-level trigger event enum.
///
/// The `#[serde(tag = "type", content = "payload")]` attribute serializes
/// each variant into a clean JSON object that notification code can
/// dispatch on, e.g.
/// `{ "type": "PriceCrossed", "payload": { "alert_id": "...", ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TriggerEvent {
    /// A price alert crossed its threshold.
    PriceCrossed(PriceTrigger),
    /// An indicator alert's condition matched.
    IndicatorMatched(IndicatorTrigger),
}

impl TriggerEvent {
    /// The id of the alert that fired.
    pub fn alert_id(&self) -> Uuid {
        match self {
            TriggerEvent::PriceCrossed(t) => t.alert_id,
            TriggerEvent::IndicatorMatched(t) => t.alert_id,
        }
    }

    /// The instrument the trigger fired for.
    pub fn key(&self) -> &SymbolKey {
        match self {
            TriggerEvent::PriceCrossed(t) => &t.key,
            TriggerEvent::IndicatorMatched(t) => &t.key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trigger_events_serialize_with_type_and_payload() {
        let event = TriggerEvent::PriceCrossed(PriceTrigger {
            alert_id: Uuid::new_v4(),
            key: SymbolKey::new("SBIN", "NSE"),
            threshold: dec!(512),
            direction: TriggerDirection::Up,
            price: dec!(513.25),
            at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PriceCrossed");
        assert_eq!(json["payload"]["direction"], "up");
        assert_eq!(event.key().to_string(), "SBIN:NSE");

        let back: TriggerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
