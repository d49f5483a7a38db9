//! # Market Feed
//!
//! Multiplexes one upstream streaming connection across many independent
//! subscribers. Symbols are reference-counted: a symbol is requested
//! upstream while at least one subscriber wants it and unsubscribed the
//! moment the last one leaves. Inbound ticks fan out to every ready
//! subscriber whose interest set matches, with per-subscriber failures
//! isolated at the dispatch boundary.
//!
//! The [`FeedHub`] is an explicitly constructed instance owned by the
//! composition root; tests build their own rather than sharing a global.

mod connection;
pub mod error;
pub mod hub;
pub mod protocol;
mod router;

// Re-export the core types to provide a clean public API.
pub use error::FeedError;
pub use hub::{FeedHub, Subscription, TickCallback};
