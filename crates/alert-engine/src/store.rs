//! The refreshed in-memory view of persisted alerts.
//!
//! The repository holds the authoritative snapshot; this store loads it
//! on a short interval (and on demand), prunes entries past the retention
//! horizon, and exposes an active-only view to the evaluation loop.
//! Mutations (removal on trigger, status flips) go through here so the
//! persisted snapshot and the view never disagree.

use crate::error::AlertError;
use crate::model::{Alert, AlertSnapshot, AlertStatus, IndicatorAlert, PriceAlert};
use crate::repository::AlertRepository;
use chrono::{Duration, Utc};
use core_types::SymbolKey;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct AlertStore {
    repo: Arc<dyn AlertRepository>,
    retention: Duration,
    /// Active alerts only; pruned and filtered on every refresh.
    view: RwLock<AlertSnapshot>,
}

impl AlertStore {
    pub fn new(repo: Arc<dyn AlertRepository>, retention_hours: i64) -> Self {
        Self {
            repo,
            retention: Duration::hours(retention_hours),
            view: RwLock::new(AlertSnapshot::default()),
        }
    }

    /// Reloads from the repository, prunes alerts past the retention
    /// horizon (persisting the pruned snapshot if anything was dropped),
    /// and rebuilds the active-only view.
    pub async fn refresh(&self) -> Result<(), AlertError> {
        let mut snapshot = self.repo.load().await?;
        let horizon = Utc::now() - self.retention;

        let mut pruned = 0usize;
        for alerts in snapshot.price_alerts.values_mut() {
            let before = alerts.len();
            alerts.retain(|a| a.created_at >= horizon);
            pruned += before - alerts.len();
        }
        snapshot.price_alerts.retain(|_, v| !v.is_empty());
        let before = snapshot.indicator_alerts.len();
        snapshot.indicator_alerts.retain(|a| a.created_at >= horizon);
        pruned += before - snapshot.indicator_alerts.len();

        if pruned > 0 {
            info!(pruned, "Pruned alerts past the retention horizon");
            self.repo.save(&snapshot).await?;
        }

        let mut view = AlertSnapshot::default();
        for (key, alerts) in &snapshot.price_alerts {
            let active: Vec<PriceAlert> = alerts
                .iter()
                .filter(|a| a.status == AlertStatus::Active)
                .cloned()
                .collect();
            if !active.is_empty() {
                view.price_alerts.insert(key.clone(), active);
            }
        }
        view.indicator_alerts = snapshot
            .indicator_alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect();

        debug!(
            price_alerts = view.price_alerts.values().map(Vec::len).sum::<usize>(),
            indicator_alerts = view.indicator_alerts.len(),
            "Alert view refreshed"
        );
        *self.view.write().await = view;
        Ok(())
    }

    /// Active price alerts on a symbol.
    pub async fn price_alerts_for(&self, key: &SymbolKey) -> Vec<PriceAlert> {
        self.view
            .read()
            .await
            .price_alerts
            .get(&key.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Active indicator alerts on a symbol.
    pub async fn indicator_alerts_for(&self, key: &SymbolKey) -> Vec<IndicatorAlert> {
        self.view
            .read()
            .await
            .indicator_alerts
            .iter()
            .filter(|a| &a.key() == key)
            .cloned()
            .collect()
    }

    /// Ids of every active alert of either kind.
    pub async fn active_ids(&self) -> HashSet<uuid::Uuid> {
        let view = self.view.read().await;
        let mut out = HashSet::new();
        for alerts in view.price_alerts.values() {
            for a in alerts {
                out.insert(a.id);
            }
        }
        for a in &view.indicator_alerts {
            out.insert(a.id);
        }
        out
    }

    /// Every symbol with at least one active alert of either kind.
    pub async fn symbols(&self) -> HashSet<SymbolKey> {
        let view = self.view.read().await;
        let mut out = HashSet::new();
        for alerts in view.price_alerts.values() {
            for a in alerts {
                out.insert(a.key());
            }
        }
        for a in &view.indicator_alerts {
            out.insert(a.key());
        }
        out
    }

    /// Adds or replaces an alert in the persisted snapshot and the view.
    pub async fn upsert(&self, alert: Alert) -> Result<(), AlertError> {
        let mut snapshot = self.repo.load().await?;
        match &alert {
            Alert::Price(a) => {
                let bucket = snapshot
                    .price_alerts
                    .entry(a.key().to_string())
                    .or_default();
                bucket.retain(|existing| existing.id != a.id);
                bucket.push(a.clone());
            }
            Alert::Indicator(a) => {
                snapshot
                    .indicator_alerts
                    .retain(|existing| existing.id != a.id);
                snapshot.indicator_alerts.push(a.clone());
            }
        }
        self.repo.save(&snapshot).await?;
        self.refresh().await
    }

    /// Removes a triggered one-shot price alert and persists the
    /// remaining set.
    pub async fn remove_price_alert(&self, id: uuid::Uuid) -> Result<(), AlertError> {
        let mut snapshot = self.repo.load().await?;
        let mut found = false;
        for alerts in snapshot.price_alerts.values_mut() {
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            found |= alerts.len() != before;
        }
        if !found {
            return Err(AlertError::NotFound(id));
        }
        snapshot.price_alerts.retain(|_, v| !v.is_empty());
        self.repo.save(&snapshot).await?;
        self.refresh().await
    }

    /// Flips a `once_per_bar` indicator alert to triggered; it stays in
    /// the persisted snapshot but leaves the active view.
    pub async fn mark_indicator_triggered(&self, id: uuid::Uuid) -> Result<(), AlertError> {
        let mut snapshot = self.repo.load().await?;
        let alert = snapshot
            .indicator_alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AlertError::NotFound(id))?;
        alert.status = AlertStatus::Triggered;
        self.repo.save(&snapshot).await?;
        self.refresh().await
    }

    /// The external change signal from the repository, for callers that
    /// tie refreshes to it.
    pub fn changed(&self) -> Arc<tokio::sync::Notify> {
        self.repo.changed()
    }
}
