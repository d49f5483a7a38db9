//! # Tickmux Events
//!
//! This crate defines the trigger-event structures handed to external
//! UI/notification collaborators when an alert fires.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the
//! definitive language for everything the alert engine reports outward.

// Declare the modules that make up this crate.
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use messages::{IndicatorTrigger, PriceTrigger, TriggerDirection, TriggerEvent};
