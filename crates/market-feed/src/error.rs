use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Cannot subscribe with an empty symbol list")]
    EmptySymbolList,

    #[error("Invalid WebSocket endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
