//! # Alert Engine
//!
//! Continuously evaluates user-defined alert conditions against the live
//! tick stream: price alerts through a stateful crossing evaluator that
//! never fires on first observation, indicator alerts through the worker
//! pool against cached OHLC history. Alert definitions live in an
//! external store behind [`repository::AlertRepository`] and are
//! refreshed on a short timer; trigger events flow back out to UI and
//! notification collaborators via a callback.

pub mod crossing;
pub mod error;
pub mod model;
pub mod monitor;
pub mod repository;
pub mod store;

// Re-export the core types to provide a clean public API.
pub use crossing::CrossingEvaluator;
pub use error::AlertError;
pub use model::{
    Alert, AlertSnapshot, AlertStatus, ComparisonSubject, IndicatorAlert, IndicatorComparison,
    IndicatorCondition, PriceAlert, PriceCondition, TriggerFrequency,
};
pub use monitor::{AlertMonitor, MonitorHandle, TriggerCallback};
pub use repository::{AlertRepository, InMemoryAlertRepository, JsonFileAlertRepository};
pub use store::AlertStore;
