//! # Tickmux Core Types
//!
//! Foundational data structures shared by every crate in the workspace:
//! symbol identity, ticks, OHLC bars, and the connection/stream enums.
//!
//! As a Layer 0 crate it has no workspace dependencies.

pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{ConnectionState, StreamMode};
pub use error::CoreError;
pub use structs::{Bar, SymbolKey, Tick};
