//! The long-running evaluation loop.
//!
//! The monitor subscribes to the shared feed for every symbol that has an
//! active alert, funnels ticks through a bounded queue, and evaluates
//! price and indicator conditions per tick. Trigger events leave through
//! a caller-supplied callback; evaluation failures never do, they are
//! logged and the alert is reconsidered on the next tick.

use crate::crossing::{Crossing, CrossingEvaluator};
use crate::error::AlertError;
use crate::model::{
    ComparisonSubject, IndicatorAlert, IndicatorComparison, PriceCondition, TriggerFrequency,
};
use crate::store::AlertStore;
use chrono::Utc;
use configuration::AlertSettings;
use core_types::{StreamMode, SymbolKey, Tick};
use events::{IndicatorTrigger, PriceTrigger, TriggerDirection, TriggerEvent};
use indicators::IndicatorEngine;
use market_feed::{FeedHub, Subscription, TickCallback};
use ohlc_cache::OhlcCache;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Receives every trigger event the monitor produces.
pub type TriggerCallback = Arc<dyn Fn(TriggerEvent) + Send + Sync>;

/// Per-tick evaluation state and logic, separate from the loop so it can
/// be driven directly in tests.
struct Evaluator {
    store: Arc<AlertStore>,
    cache: Arc<OhlcCache>,
    engine: Arc<IndicatorEngine>,
    crossing: CrossingEvaluator,
    /// Last computed indicator value per alert, for cross comparisons.
    prev_values: HashMap<Uuid, Decimal>,
    on_trigger: TriggerCallback,
}

impl Evaluator {
    /// Hands the event to the caller's callback with the same isolation
    /// the router gives tick callbacks: a panicking consumer is logged,
    /// not allowed to kill the evaluation loop.
    fn emit(&self, event: TriggerEvent) {
        let alert_id = event.alert_id();
        if catch_unwind(AssertUnwindSafe(|| (self.on_trigger)(event))).is_err() {
            error!(%alert_id, "Trigger callback panicked; isolating.");
        }
    }

    /// Drops crossing positions and previous indicator values for alerts
    /// that no longer exist, so externally removed alerts do not
    /// accumulate state.
    async fn prune_stale_state(&mut self) {
        let live = self.store.active_ids().await;
        self.crossing.retain_alerts(&live);
        self.prev_values.retain(|id, _| live.contains(id));
    }

    async fn handle_tick(&mut self, tick: &Tick) {
        let key = tick.key();

        for alert in self.store.price_alerts_for(&key).await {
            let Some(crossing) =
                self.crossing
                    .observe(alert.id, &key, alert.threshold, tick.last_price)
            else {
                continue;
            };
            let matched = match alert.condition {
                PriceCondition::Crossing => true,
                PriceCondition::CrossingUp => crossing == Crossing::Up,
                PriceCondition::CrossingDown => crossing == Crossing::Down,
            };
            if !matched {
                continue;
            }

            info!(alert_id = %alert.id, key = %key, price = %tick.last_price, "Price alert triggered.");
            self.emit(TriggerEvent::PriceCrossed(PriceTrigger {
                alert_id: alert.id,
                key: key.clone(),
                threshold: alert.threshold,
                direction: match crossing {
                    Crossing::Up => TriggerDirection::Up,
                    Crossing::Down => TriggerDirection::Down,
                },
                price: tick.last_price,
                at: Utc::now(),
            }));

            // One-shot: drop the alert and its tracked position.
            if let Err(e) = self.store.remove_price_alert(alert.id).await {
                error!(alert_id = %alert.id, error = %e, "Failed to remove a triggered price alert.");
            }
            self.crossing.forget(alert.id);
        }

        for alert in self.store.indicator_alerts_for(&key).await {
            self.evaluate_indicator(&alert, tick).await;
        }

        self.crossing.record_price(&key, tick.last_price);
    }

    async fn evaluate_indicator(&mut self, alert: &IndicatorAlert, tick: &Tick) {
        // No cached bars yet is expected, not an error.
        let Some(bars) = self
            .cache
            .get(&alert.symbol, &alert.exchange, &alert.interval)
            .await
        else {
            return;
        };

        let output = match self.engine.compute(alert.indicator.clone(), &bars).await {
            Ok(output) => output,
            Err(e) => {
                debug!(alert_id = %alert.id, error = %e, "Indicator computation failed; skipping this tick.");
                return;
            }
        };

        let previous = self.prev_values.get(&alert.id).copied().or(output.previous);
        let current = output.current;
        // Stored regardless of the trigger outcome.
        self.prev_values.insert(alert.id, current);

        let target = alert.condition.value;
        let subject = match alert.condition.subject {
            ComparisonSubject::IndicatorValue => current,
            ComparisonSubject::LastPrice => tick.last_price,
        };
        let matched = match alert.condition.comparison {
            IndicatorComparison::CrossesAbove => {
                matches!(previous, Some(p) if p < target && current >= target)
            }
            IndicatorComparison::CrossesBelow => {
                matches!(previous, Some(p) if p > target && current <= target)
            }
            IndicatorComparison::GreaterThan => subject > target,
            IndicatorComparison::LessThan => subject < target,
        };
        if !matched {
            return;
        }

        info!(
            alert_id = %alert.id,
            indicator = alert.indicator.name(),
            value = %current,
            "Indicator alert triggered."
        );
        self.emit(TriggerEvent::IndicatorMatched(IndicatorTrigger {
            alert_id: alert.id,
            key: alert.key(),
            indicator: alert.indicator.name().to_string(),
            interval: alert.interval.clone(),
            value: current,
            price: tick.last_price,
            at: Utc::now(),
        }));

        match alert.frequency {
            TriggerFrequency::OncePerBar => {
                if let Err(e) = self.store.mark_indicator_triggered(alert.id).await {
                    error!(alert_id = %alert.id, error = %e, "Failed to mark an indicator alert triggered.");
                }
            }
            TriggerFrequency::EveryTime => {}
        }
    }
}

/// Wires the alert store to the shared feed and runs the evaluation loop.
pub struct AlertMonitor {
    hub: Arc<FeedHub>,
    store: Arc<AlertStore>,
    cache: Arc<OhlcCache>,
    engine: Arc<IndicatorEngine>,
    settings: AlertSettings,
}

impl AlertMonitor {
    pub fn new(
        hub: Arc<FeedHub>,
        store: Arc<AlertStore>,
        cache: Arc<OhlcCache>,
        engine: Arc<IndicatorEngine>,
        settings: AlertSettings,
    ) -> Self {
        Self {
            hub,
            store,
            cache,
            engine,
            settings,
        }
    }

    /// Performs the initial refresh, subscribes for every alerted symbol,
    /// and spawns the evaluation loop.
    pub async fn start(self, on_trigger: TriggerCallback) -> Result<MonitorHandle, AlertError> {
        self.store.refresh().await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            self.hub,
            Arc::clone(&self.store),
            Evaluator {
                store: self.store,
                cache: self.cache,
                engine: self.engine,
                crossing: CrossingEvaluator::new(),
                prev_values: HashMap::new(),
                on_trigger,
            },
            self.settings,
            stop_rx,
        ));
        Ok(MonitorHandle {
            stop: Some(stop_tx),
            task,
        })
    }
}

async fn run_loop(
    hub: Arc<FeedHub>,
    store: Arc<AlertStore>,
    mut evaluator: Evaluator,
    settings: AlertSettings,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let (tick_tx, mut tick_rx) = mpsc::channel::<Tick>(settings.tick_queue_capacity);
    let changed = store.changed();
    let mut refresh = tokio::time::interval(Duration::from_secs(settings.refresh_secs.max(1)));
    // The interval's immediate first tick would refresh twice at startup.
    refresh.tick().await;

    let mut current_symbols: HashSet<SymbolKey> = HashSet::new();
    let mut subscription: Option<Subscription> = None;
    resync_subscription(&hub, &store, &tick_tx, &mut current_symbols, &mut subscription).await;

    info!(symbols = current_symbols.len(), "Alert monitor started.");
    loop {
        tokio::select! {
            Some(tick) = tick_rx.recv() => {
                evaluator.handle_tick(&tick).await;
                // A trigger may have removed the last alert on a symbol.
                resync_subscription(&hub, &store, &tick_tx, &mut current_symbols, &mut subscription).await;
            }
            _ = refresh.tick() => {
                if let Err(e) = store.refresh().await {
                    error!(error = %e, "Periodic alert refresh failed.");
                }
                evaluator.prune_stale_state().await;
                resync_subscription(&hub, &store, &tick_tx, &mut current_symbols, &mut subscription).await;
            }
            _ = changed.notified() => {
                debug!("External alert change signal; refreshing immediately.");
                if let Err(e) = store.refresh().await {
                    error!(error = %e, "Forced alert refresh failed.");
                }
                evaluator.prune_stale_state().await;
                resync_subscription(&hub, &store, &tick_tx, &mut current_symbols, &mut subscription).await;
            }
            _ = &mut stop_rx => {
                info!("Alert monitor stopping.");
                break;
            }
        }
    }
    if let Some(sub) = subscription {
        sub.close();
    }
}

/// Aligns the feed subscription with the set of alerted symbols,
/// resubscribing only when the set actually changed.
async fn resync_subscription(
    hub: &FeedHub,
    store: &AlertStore,
    tick_tx: &mpsc::Sender<Tick>,
    current: &mut HashSet<SymbolKey>,
    subscription: &mut Option<Subscription>,
) {
    let wanted = store.symbols().await;
    if wanted == *current {
        return;
    }

    // Open the replacement before closing the old subscription: shared
    // symbols keep a nonzero interest count, so a shrinking alert set
    // does not tear down the connection out from under the survivors.
    let mut replacement = None;
    if !wanted.is_empty() {
        let symbols: Vec<SymbolKey> = wanted.iter().cloned().collect();
        let tx = tick_tx.clone();
        let on_tick: TickCallback = Arc::new(move |tick: &Tick| {
            if let Err(e) = tx.try_send(tick.clone()) {
                // Dropping under backpressure beats stalling the router.
                warn!(error = %e, "Alert tick queue full; dropping a tick.");
            }
        });
        match hub.subscribe(&symbols, StreamMode::Ltp, on_tick) {
            Ok(sub) => replacement = Some(sub),
            Err(e) => error!(error = %e, "Failed to subscribe for alerted symbols."),
        }
    }
    if let Some(old) = subscription.take() {
        old.close();
    }
    *subscription = replacement;
    debug!(from = current.len(), to = wanted.len(), "Alerted symbol set changed; resubscribed.");
    *current = wanted;
}

/// Owns the evaluation loop. [`stop`] ends it gracefully; dropping the
/// handle without stopping aborts it.
///
/// [`stop`]: MonitorHandle::stop
pub struct MonitorHandle {
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}
