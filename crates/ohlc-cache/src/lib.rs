//! # OHLC Cache
//!
//! A bounded, TTL-based store of historical bars per (symbol, exchange,
//! interval). Chart components feed it; the indicator engine reads it.
//!
//! Entries are evicted purely by staleness of *access* time: a read
//! refreshes the TTL clock, a write alone does not keep an entry alive
//! forever. The eviction sweep runs on its own timer, owned by an
//! explicit [`SweeperHandle`] so shutdown is deterministic.

use core_types::Bar;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Maps the interval spellings used by different chart components onto one
/// canonical form, so `Put("60")` and `Get("1h")` meet in the same entry.
/// Unknown spellings pass through unchanged.
pub fn normalize_interval(interval: &str) -> String {
    match interval {
        "1" | "1m" | "1min" => "1m",
        "3" | "3m" | "3min" => "3m",
        "5" | "5m" | "5min" => "5m",
        "15" | "15m" | "15min" => "15m",
        "30" | "30m" | "30min" => "30m",
        "60" | "1h" | "1H" | "60min" => "1h",
        "D" | "1D" | "1d" | "day" => "1d",
        "W" | "1W" | "1w" | "week" => "1w",
        other => other,
    }
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    symbol: String,
    exchange: String,
    interval: String,
}

impl CacheKey {
    fn new(symbol: &str, exchange: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            interval: interval.to_string(),
        }
    }
}

struct CacheEntry {
    bars: Arc<Vec<Bar>>,
    written_at: Instant,
    last_access: Instant,
}

/// Shared TTL cache of OHLC bar series.
pub struct OhlcCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl OhlcCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Stores (or overwrites) the bar series for an instrument/interval.
    ///
    /// The entry is stored under the normalized interval key and, if the
    /// caller's spelling differs, under the original key as well, so
    /// lookups using either spelling succeed.
    pub async fn put(&self, symbol: &str, exchange: &str, interval: &str, bars: Vec<Bar>) {
        let now = Instant::now();
        let bars = Arc::new(bars);
        let normalized = normalize_interval(interval);

        let mut entries = self.entries.lock().await;
        entries.insert(
            CacheKey::new(symbol, exchange, &normalized),
            CacheEntry {
                bars: Arc::clone(&bars),
                written_at: now,
                last_access: now,
            },
        );
        if normalized != interval {
            entries.insert(
                CacheKey::new(symbol, exchange, interval),
                CacheEntry {
                    bars,
                    written_at: now,
                    last_access: now,
                },
            );
        }
    }

    /// Looks up the bar series, trying the exact interval spelling first
    /// and then the normalized form. A hit refreshes the access timestamp.
    pub async fn get(&self, symbol: &str, exchange: &str, interval: &str) -> Option<Arc<Vec<Bar>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        for candidate in [interval.to_string(), normalize_interval(interval)] {
            if let Some(entry) = entries.get_mut(&CacheKey::new(symbol, exchange, &candidate)) {
                entry.last_access = now;
                return Some(Arc::clone(&entry.bars));
            }
        }
        None
    }

    /// Removes entries whose access timestamp is older than the TTL.
    /// Returns the number of evicted entries.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.last_access) < ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "OHLC cache sweep evicted stale entries.");
        }
        evicted
    }

    /// Number of live entries (alias spellings count separately).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Age of the most recent write for an entry, if present. Lets chart
    /// components decide whether to re-fetch; does not refresh the access
    /// timestamp.
    pub async fn written_age(&self, symbol: &str, exchange: &str, interval: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        entries
            .get(&CacheKey::new(symbol, exchange, &normalize_interval(interval)))
            .map(|entry| entry.written_at.elapsed())
    }
}

/// Owns the periodic eviction task. Dropping or calling [`stop`] aborts it.
///
/// [`stop`]: SweeperHandle::stop
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns the eviction sweep on its own timer.
pub fn start_sweeper(cache: Arc<OhlcCache>, every: Duration) -> SweeperHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick fires immediately; skip it so a fresh cache is
        // not swept before anything has been written.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.sweep().await;
        }
    });
    SweeperHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                time: Utc::now(),
                open: dec!(100) + rust_decimal::Decimal::from(i as u64),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100.5),
                volume: dec!(10),
            })
            .collect()
    }

    #[tokio::test]
    async fn get_within_ttl_returns_put_data_unchanged() {
        let cache = OhlcCache::new(Duration::from_secs(60));
        let series = bars(3);
        cache.put("INFY", "NSE", "1h", series.clone()).await;

        let got = cache.get("INFY", "NSE", "1h").await.unwrap();
        assert_eq!(*got, series);
    }

    #[tokio::test]
    async fn lookup_succeeds_under_either_interval_spelling() {
        let cache = OhlcCache::new(Duration::from_secs(60));
        cache.put("INFY", "NSE", "60", bars(2)).await;

        assert!(cache.get("INFY", "NSE", "1h").await.is_some());
        assert!(cache.get("INFY", "NSE", "60").await.is_some());
        assert!(cache.get("INFY", "NSE", "5m").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_entries_stale_by_access_time() {
        let cache = OhlcCache::new(Duration::from_secs(60));
        cache.put("INFY", "NSE", "1h", bars(2)).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.sweep().await, 1);
        assert!(cache.get("INFY", "NSE", "1h").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn read_access_refreshes_the_ttl_clock_but_not_the_write_age() {
        let cache = OhlcCache::new(Duration::from_secs(60));
        cache.put("INFY", "NSE", "1h", bars(2)).await;

        // Read just before expiry; the access timestamp moves forward even
        // though the entry was never re-written.
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(cache.get("INFY", "NSE", "1h").await.is_some());

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.sweep().await, 0);
        assert!(cache.get("INFY", "NSE", "1h").await.is_some());
        assert_eq!(
            cache.written_age("INFY", "NSE", "1h").await,
            Some(Duration::from_secs(100))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_evicts_on_its_own_timer() {
        let cache = Arc::new(OhlcCache::new(Duration::from_secs(30)));
        cache.put("TCS", "NSE", "5m", bars(1)).await;

        let handle = start_sweeper(Arc::clone(&cache), Duration::from_secs(10));
        // Poll the sweeper once so its timer starts before the clock moves.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(45)).await;
        // Let the sweeper task run after the clock moved.
        tokio::task::yield_now().await;

        assert_eq!(cache.len().await, 0);
        handle.stop();
    }
}
