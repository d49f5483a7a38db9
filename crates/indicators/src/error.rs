use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("Invalid period {0}: must be at least 1")]
    InvalidPeriod(usize),

    #[error("Not enough bars: needed {needed}, got {got}")]
    NotEnoughData { needed: usize, got: usize },

    #[error("Computation request {request_id} timed out")]
    Timeout { request_id: u64 },

    #[error("Worker pool is shut down")]
    PoolClosed,
}
