//! Fan-out dispatch of inbound ticks to registered subscribers.
//!
//! Dispatch holds the registry read lock while invoking callbacks, so a
//! `remove` (which takes the write lock) returning means no further
//! callbacks for that subscriber are running or will run. Each callback
//! is wrapped in `catch_unwind`: one panicking subscriber cannot stop
//! delivery to the others or corrupt router state.

use core_types::{SymbolKey, Tick};
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Delivery callback supplied by a subscriber. Expected to be cheap
/// (typically a channel send); heavy processing belongs on the
/// subscriber's own task.
pub type TickCallback = Arc<dyn Fn(&Tick) + Send + Sync>;

pub(crate) struct Subscriber {
    pub symbols: HashSet<SymbolKey>,
    callback: TickCallback,
    /// False until subscription setup completes; ticks are withheld from
    /// a half-initialized consumer.
    ready: AtomicBool,
}

impl Subscriber {
    pub fn new(symbols: HashSet<SymbolKey>, callback: TickCallback) -> Self {
        Self {
            symbols,
            callback,
            ready: AtomicBool::new(false),
        }
    }
}

#[derive(Default)]
pub(crate) struct TickRouter {
    subscribers: RwLock<HashMap<u64, Arc<Subscriber>>>,
}

impl TickRouter {
    pub fn register(&self, id: u64, subscriber: Arc<Subscriber>) {
        self.subscribers
            .write()
            .expect("router lock poisoned")
            .insert(id, subscriber);
    }

    pub fn mark_ready(&self, id: u64) {
        if let Some(sub) = self.subscribers.read().expect("router lock poisoned").get(&id) {
            sub.ready.store(true, Ordering::Release);
        }
    }

    pub fn remove(&self, id: u64) {
        self.subscribers
            .write()
            .expect("router lock poisoned")
            .remove(&id);
    }

    /// Delivers the tick to every ready subscriber interested in its
    /// symbol key. Returns the number of successful deliveries.
    pub fn dispatch(&self, tick: &Tick) -> usize {
        let key = tick.key();
        let subscribers = self.subscribers.read().expect("router lock poisoned");
        let mut delivered = 0;
        for (id, sub) in subscribers.iter() {
            if !sub.ready.load(Ordering::Acquire) || !sub.symbols.contains(&key) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (sub.callback)(tick))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(subscriber_id = id, key = %key, "Subscriber callback panicked; isolating.");
                }
            }
        }
        delivered
    }
}
