//! Wire frames for the upstream streaming protocol: JSON over a
//! persistent socket. Outbound frames are tagged by `action` (except the
//! keepalive pong, which mirrors the server's `type` tag); inbound frames
//! are tagged by `type`.

use chrono::{DateTime, TimeZone, Utc};
use core_types::{StreamMode, Tick};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Client-to-server request frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundAction {
    Authenticate {
        api_key: String,
    },
    Subscribe {
        symbol: String,
        exchange: String,
        mode: StreamMode,
    },
    Unsubscribe {
        symbol: String,
        exchange: String,
    },
}

/// The keepalive reply. The server treats a missed pong as a dead session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundControl {
    Pong,
}

/// Server-to-client frames. Anything that fails to parse is logged and
/// dropped without closing the connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Ping,
    #[serde(rename = "auth", alias = "authenticated")]
    Auth { status: String },
    MarketData {
        symbol: String,
        exchange: String,
        data: TickData,
    },
}

/// The payload of a `market_data` frame. Only the last traded price is
/// guaranteed; the rest depends on the subscribed stream mode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickData {
    #[serde(alias = "last_price")]
    pub ltp: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<Decimal>,
    /// Epoch milliseconds; absent on some feeds.
    pub timestamp: Option<i64>,
}

impl TickData {
    /// Builds the routed [`Tick`], stamping receipt time when the frame
    /// carried no timestamp.
    pub fn into_tick(self, symbol: String, exchange: String) -> Tick {
        let timestamp = self
            .timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        Tick {
            symbol,
            exchange,
            last_price: self.ltp,
            open: self.open,
            high: self.high,
            low: self.low,
            volume: self.volume,
            timestamp,
        }
    }
}

/// Whether an auth frame reports a successful authentication.
pub fn auth_succeeded(status: &str) -> bool {
    matches!(status, "success" | "ok")
}
