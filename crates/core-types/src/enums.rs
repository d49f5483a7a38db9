use serde::{Deserialize, Serialize};

/// The lifecycle state of the shared upstream connection.
///
/// Exposed to callers through a `watch` channel so status indicators can
/// render it; only the connection task itself transitions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
}

/// How much of each market-data update a subscriber wants.
///
/// Sent verbatim in the upstream subscribe frame. Ordered by field depth
/// so the multiplexer can request the widest mode any subscriber asked
/// for on a shared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Last traded price only.
    Ltp,
    /// Price plus open/high/low/volume.
    Quote,
    /// Everything the upstream sends.
    Full,
}
