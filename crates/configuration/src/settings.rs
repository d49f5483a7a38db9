use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub feed: FeedSettings,
    pub alerts: AlertSettings,
    pub indicators: IndicatorSettings,
    pub cache: CacheSettings,
}

/// Parameters for the shared upstream streaming connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// The WebSocket endpoint of the market-data provider.
    pub ws_url: String,
    /// The opaque credential sent in the authenticate frame. Usually
    /// supplied via the TICKMUX__FEED__API_KEY environment variable.
    pub api_key: String,
    /// Delay before the single reconnect attempt after an unexpected close.
    pub reconnect_delay_secs: u64,
    /// Capacity of the outbound command channel feeding the socket task.
    pub command_queue_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.example.com/marketdata".to_string(),
            api_key: String::new(),
            reconnect_delay_secs: 5,
            command_queue_capacity: 256,
        }
    }
}

/// Parameters for alert loading and evaluation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// How often the alert store re-reads the persisted definitions.
    pub refresh_secs: u64,
    /// Alerts older than this horizon are pruned on load.
    pub retention_hours: i64,
    /// Capacity of the bounded queue between the tick router and the
    /// alert monitor. Overflow drops the tick with a warning.
    pub tick_queue_capacity: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            refresh_secs: 5,
            retention_hours: 24,
            tick_queue_capacity: 1024,
        }
    }
}

/// Parameters for the indicator computation worker pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    /// Number of worker tasks computing indicator values.
    pub workers: usize,
    /// A computation that has not answered within this window is treated
    /// as failed for that tick.
    pub timeout_ms: u64,
    /// Input bar slices are truncated to at most this many bars.
    pub max_lookback_bars: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout_ms: 2_000,
            max_lookback_bars: 500,
        }
    }
}

/// Parameters for the OHLC bar cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entries not accessed within this window are evicted by the sweep.
    pub ttl_secs: u64,
    /// How often the eviction sweep runs. Independent of the alert
    /// refresh interval.
    pub sweep_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_secs: 60,
        }
    }
}
