//! The subscription multiplexer: many independent subscribers, one
//! upstream connection.

use crate::connection::{self, ConnectionHandle};
use crate::error::FeedError;
use crate::protocol::OutboundAction;
use crate::router::{Subscriber, TickRouter};
use configuration::FeedSettings;
use core_types::{ConnectionState, StreamMode, SymbolKey};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use url::Url;

pub use crate::router::TickCallback;

/// Reference count and requested depth for one symbol in the interest set.
struct SymbolInterest {
    count: usize,
    mode: StreamMode,
}

struct HubInner {
    interest: HashMap<SymbolKey, SymbolInterest>,
    /// Symbols owned by each live subscription, released on close.
    subscriptions: HashMap<u64, Vec<SymbolKey>>,
    conn: Option<ConnectionHandle>,
    next_id: u64,
}

/// State shared between the hub facade, subscriptions, and the session
/// task. All interest-set mutation goes through the hub's own operations.
pub(crate) struct HubShared {
    pub settings: FeedSettings,
    pub router: TickRouter,
    inner: Mutex<HubInner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl HubShared {
    pub fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(?previous, current = ?state, "Connection state changed.");
        }
    }

    pub fn has_subscribers(&self) -> bool {
        !self
            .inner
            .lock()
            .expect("hub lock poisoned")
            .subscriptions
            .is_empty()
    }

    /// The materialized interest set: what gets (re-)requested after every
    /// successful authentication. Per-subscriber history is never replayed;
    /// this snapshot is sufficient and idempotent.
    pub fn interest_snapshot(&self) -> Vec<(SymbolKey, StreamMode)> {
        self.inner
            .lock()
            .expect("hub lock poisoned")
            .interest
            .iter()
            .map(|(key, entry)| (key.clone(), entry.mode))
            .collect()
    }
}

/// The multiplexer. Explicitly constructed and injectable: the composition
/// root owns one instance, tests build their own.
pub struct FeedHub {
    shared: Arc<HubShared>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl FeedHub {
    pub fn new(settings: FeedSettings) -> Result<Self, FeedError> {
        // Fail construction, not the first subscribe, on a bad endpoint.
        Url::parse(&settings.ws_url)?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            shared: Arc::new(HubShared {
                settings,
                router: TickRouter::default(),
                inner: Mutex::new(HubInner {
                    interest: HashMap::new(),
                    subscriptions: HashMap::new(),
                    conn: None,
                    next_id: 1,
                }),
                state_tx,
            }),
            state_rx,
        })
    }

    /// Observable connection state for status indicators.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Registers a subscriber for a set of symbols.
    ///
    /// Interest counts are incremented and a connection is ensured before
    /// the subscriber is marked ready, so an inbound tick can never reach
    /// a half-built consumer. If the session is already authenticated,
    /// symbols whose count just became one (or whose requested depth
    /// widened) are requested upstream immediately; otherwise the
    /// resubscribe-on-auth path covers them.
    pub fn subscribe(
        &self,
        symbols: &[SymbolKey],
        mode: StreamMode,
        on_tick: TickCallback,
    ) -> Result<Subscription, FeedError> {
        if symbols.is_empty() {
            return Err(FeedError::EmptySymbolList);
        }
        let symbol_set: HashSet<SymbolKey> = symbols.iter().cloned().collect();

        let id;
        {
            let mut inner = self.shared.inner.lock().expect("hub lock poisoned");
            id = inner.next_id;
            inner.next_id += 1;

            self.shared
                .router
                .register(id, Arc::new(Subscriber::new(symbol_set.clone(), on_tick)));
            inner
                .subscriptions
                .insert(id, symbol_set.iter().cloned().collect());

            let mut to_request = Vec::new();
            for key in &symbol_set {
                let entry = inner
                    .interest
                    .entry(key.clone())
                    .or_insert(SymbolInterest { count: 0, mode });
                entry.count += 1;
                let widened = mode > entry.mode;
                if widened {
                    entry.mode = mode;
                }
                if entry.count == 1 || widened {
                    to_request.push((key.clone(), entry.mode));
                }
            }

            let needs_session = match &inner.conn {
                None => true,
                Some(handle) => handle.is_finished(),
            };
            if needs_session {
                tracing::info!(subscriber_id = id, "Starting the shared connection.");
                inner.conn = Some(connection::spawn(Arc::clone(&self.shared)));
            } else if *self.state_rx.borrow() == ConnectionState::Connected {
                if let Some(conn) = &inner.conn {
                    for (key, mode) in &to_request {
                        conn.send(OutboundAction::Subscribe {
                            symbol: key.symbol.clone(),
                            exchange: key.exchange.clone(),
                            mode: *mode,
                        });
                    }
                }
            }
        }

        // Registration is complete; ticks may now be delivered.
        self.shared.router.mark_ready(id);
        tracing::debug!(subscriber_id = id, symbols = symbol_set.len(), "Subscriber ready.");

        Ok(Subscription {
            shared: Arc::clone(&self.shared),
            id,
            closed: AtomicBool::new(false),
        })
    }
}

/// A live subscription. [`close`] is idempotent; dropping the handle
/// closes it as well.
///
/// [`close`]: Subscription::close
pub struct Subscription {
    shared: Arc<HubShared>,
    id: u64,
    closed: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the subscriber from dispatch (no further callbacks after
    /// this returns) and releases its symbol interest. Symbols whose
    /// count reaches zero are unsubscribed upstream; when the last
    /// subscriber leaves, the connection is closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.router.remove(self.id);

        let mut inner = self.shared.inner.lock().expect("hub lock poisoned");
        if let Some(symbols) = inner.subscriptions.remove(&self.id) {
            for key in symbols {
                let released = match inner.interest.get_mut(&key) {
                    Some(entry) => {
                        entry.count = entry.count.saturating_sub(1);
                        entry.count == 0
                    }
                    None => false,
                };
                if released {
                    inner.interest.remove(&key);
                    if let Some(conn) = &inner.conn {
                        conn.send(OutboundAction::Unsubscribe {
                            symbol: key.symbol.clone(),
                            exchange: key.exchange.clone(),
                        });
                    }
                    tracing::debug!(key = %key, "Symbol released from the interest set.");
                }
            }
        }

        if inner.subscriptions.is_empty() {
            if let Some(conn) = inner.conn.take() {
                tracing::info!("Last subscriber left; closing the connection.");
                conn.shutdown();
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Tick;

    fn noop_callback() -> TickCallback {
        Arc::new(|_t: &Tick| {})
    }

    fn test_hub() -> FeedHub {
        FeedHub::new(FeedSettings {
            ws_url: "ws://127.0.0.1:1/stream".to_string(),
            api_key: "k".to_string(),
            reconnect_delay_secs: 1,
            command_queue_capacity: 16,
        })
        .unwrap()
    }

    fn keys(raw: &[&str]) -> Vec<SymbolKey> {
        raw.iter().map(|k| k.parse().unwrap()).collect()
    }

    fn interest_count(hub: &FeedHub, key: &str) -> Option<usize> {
        let key: SymbolKey = key.parse().unwrap();
        hub.shared
            .inner
            .lock()
            .unwrap()
            .interest
            .get(&key)
            .map(|e| e.count)
    }

    #[tokio::test]
    async fn empty_symbol_list_is_rejected() {
        let hub = test_hub();
        assert!(matches!(
            hub.subscribe(&[], StreamMode::Ltp, noop_callback()),
            Err(FeedError::EmptySymbolList)
        ));
    }

    #[tokio::test]
    async fn interest_counts_track_live_subscribers() {
        let hub = test_hub();
        let a = hub
            .subscribe(&keys(&["SBIN:NSE", "TCS:NSE"]), StreamMode::Ltp, noop_callback())
            .unwrap();
        let b = hub
            .subscribe(&keys(&["SBIN:NSE"]), StreamMode::Ltp, noop_callback())
            .unwrap();

        assert_eq!(interest_count(&hub, "SBIN:NSE"), Some(2));
        assert_eq!(interest_count(&hub, "TCS:NSE"), Some(1));

        a.close();
        assert_eq!(interest_count(&hub, "SBIN:NSE"), Some(1));
        assert_eq!(interest_count(&hub, "TCS:NSE"), None);

        b.close();
        assert_eq!(interest_count(&hub, "SBIN:NSE"), None);
        assert!(!hub.shared.has_subscribers());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let hub = test_hub();
        let sub = hub
            .subscribe(&keys(&["SBIN:NSE"]), StreamMode::Ltp, noop_callback())
            .unwrap();
        sub.close();
        sub.close();
        assert_eq!(interest_count(&hub, "SBIN:NSE"), None);
    }

    #[tokio::test]
    async fn duplicate_symbols_in_one_subscribe_count_once() {
        let hub = test_hub();
        let sub = hub
            .subscribe(
                &keys(&["SBIN:NSE", "SBIN:NSE"]),
                StreamMode::Ltp,
                noop_callback(),
            )
            .unwrap();
        assert_eq!(interest_count(&hub, "SBIN:NSE"), Some(1));
        sub.close();
        assert_eq!(interest_count(&hub, "SBIN:NSE"), None);
    }

    #[tokio::test]
    async fn shared_symbol_mode_widens_to_the_deepest_request() {
        let hub = test_hub();
        let _a = hub
            .subscribe(&keys(&["SBIN:NSE"]), StreamMode::Ltp, noop_callback())
            .unwrap();
        let _b = hub
            .subscribe(&keys(&["SBIN:NSE"]), StreamMode::Full, noop_callback())
            .unwrap();

        let snapshot = hub.shared.interest_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1, StreamMode::Full);
    }
}
