use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid symbol key '{0}': expected SYMBOL:EXCHANGE")]
    InvalidSymbolKey(String),
}
