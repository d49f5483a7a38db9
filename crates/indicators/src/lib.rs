//! # Indicators
//!
//! Technical-indicator computations over cached OHLC history, offloaded to
//! a bounded worker pool with request correlation and a per-request
//! timeout. The computations themselves are pure functions in [`compute`];
//! [`engine::IndicatorEngine`] owns the pool and is what the alert monitor
//! talks to.

pub mod compute;
pub mod engine;
pub mod error;

// Re-export the core types to provide a clean public API.
pub use compute::{IndicatorKind, IndicatorOutput};
pub use engine::IndicatorEngine;
pub use error::IndicatorError;
