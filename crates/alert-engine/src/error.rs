use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to read or write the alert store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize the alert snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Alert {0} not found")]
    NotFound(Uuid),
}
