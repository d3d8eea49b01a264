use bittrex_core::{RestError, SymbolError};
use bittrex_stream::StreamError;

/// Errors that can occur while synchronizing an order book.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),
    #[error("Synchronizer already running for {0}")]
    AlreadyStarted(String),
    #[error("Synchronizer not started")]
    NotStarted,
    #[error("Delta subscription failed: {0}")]
    Subscribe(#[from] StreamError),
    #[error("Snapshot request failed: {0}")]
    Snapshot(#[from] RestError),
}
