use crate::compute::{self, IndicatorKind, IndicatorOutput};
use crate::error::IndicatorError;
use configuration::IndicatorSettings;
use core_types::Bar;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};

/// One computation request travelling to the worker pool. Transient:
/// resolved through the oneshot reply or abandoned on timeout, never
/// persisted.
struct Job {
    request_id: u64,
    kind: IndicatorKind,
    bars: Vec<Bar>,
    reply: oneshot::Sender<Result<IndicatorOutput, IndicatorError>>,
}

/// A bounded pool of worker tasks computing indicator values.
///
/// Requests are correlated by id and guarded by a fixed timeout: a worker
/// that does not answer in time yields [`IndicatorError::Timeout`] for
/// that tick and the late result, if any, is discarded with the oneshot.
pub struct IndicatorEngine {
    tx: mpsc::Sender<Job>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    timeout: Duration,
    max_lookback: usize,
    next_request_id: AtomicU64,
}

impl IndicatorEngine {
    pub fn new(settings: &IndicatorSettings) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(settings.workers.max(1) * 2);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..settings.workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        tracing::trace!(
                            worker_id,
                            request_id = job.request_id,
                            indicator = job.kind.name(),
                            bars = job.bars.len(),
                            "Computing indicator."
                        );
                        let result = compute::compute(&job.kind, &job.bars);
                        // A closed reply channel means the caller timed out;
                        // the result is simply discarded.
                        let _ = job.reply.send(result);
                    }
                })
            })
            .collect();

        Self {
            tx,
            workers,
            timeout: Duration::from_millis(settings.timeout_ms),
            max_lookback: settings.max_lookback_bars,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Dispatches a computation to the pool and awaits the correlated
    /// reply. The input is sliced to the configured maximum lookback
    /// before it is sent, bounding the cost of any single request.
    pub async fn compute(
        &self,
        kind: IndicatorKind,
        bars: &[Bar],
    ) -> Result<IndicatorOutput, IndicatorError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let start = bars.len().saturating_sub(self.max_lookback);
        let bars = bars[start..].to_vec();

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            request_id,
            kind,
            bars,
            reply: reply_tx,
        };
        self.tx
            .send(job)
            .await
            .map_err(|_| IndicatorError::PoolClosed)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IndicatorError::PoolClosed),
            Err(_) => {
                tracing::warn!(request_id, "Indicator computation timed out.");
                Err(IndicatorError::Timeout { request_id })
            }
        }
    }
}

impl Drop for IndicatorEngine {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
