//! Persistence seam for alert definitions.
//!
//! The engine never dictates where alerts live; it reads and writes whole
//! snapshots through this trait. A `Notify` handle carries the external
//! "storage changed" signal (another process or tab mutated the store) so
//! the alert store can refresh immediately instead of waiting for its
//! next periodic tick.

use crate::error::AlertError;
use crate::model::AlertSnapshot;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn load(&self) -> Result<AlertSnapshot, AlertError>;
    async fn save(&self, snapshot: &AlertSnapshot) -> Result<(), AlertError>;

    /// Fired when the underlying store changed outside this process.
    fn changed(&self) -> Arc<Notify>;
}

/// Snapshot persistence as a single JSON file. A missing file reads as an
/// empty snapshot.
pub struct JsonFileAlertRepository {
    path: PathBuf,
    changed: Arc<Notify>,
}

impl JsonFileAlertRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Hook for embedders wiring an external watcher (file notification,
    /// storage event) into the refresh path.
    pub fn signal_changed(&self) {
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl AlertRepository for JsonFileAlertRepository {
    async fn load(&self) -> Result<AlertSnapshot, AlertError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AlertSnapshot::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshot: &AlertSnapshot) -> Result<(), AlertError> {
        let text = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }

    fn changed(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }
}

/// In-memory persistence. Saving notifies the change signal, which makes
/// it a convenient stand-in for a second writer in tests.
#[derive(Default)]
pub struct InMemoryAlertRepository {
    snapshot: Mutex<AlertSnapshot>,
    changed: Arc<Notify>,
}

impl InMemoryAlertRepository {
    pub fn new(snapshot: AlertSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Replaces the stored snapshot as an external writer would, firing
    /// the change signal.
    pub async fn replace(&self, snapshot: AlertSnapshot) {
        *self.snapshot.lock().await = snapshot;
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn load(&self) -> Result<AlertSnapshot, AlertError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &AlertSnapshot) -> Result<(), AlertError> {
        *self.snapshot.lock().await = snapshot.clone();
        Ok(())
    }

    fn changed(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }
}
