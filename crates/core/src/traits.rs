use crate::models::*;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Why a market symbol was rejected before reaching the exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("Symbol '{0}' must be two segments joined by '-' (e.g. BTC-USD)")]
    MissingSeparator(String),
    #[error("Symbol '{0}' has an empty segment")]
    EmptySegment(String),
    #[error("Symbol '{symbol}' contains invalid character '{character}'")]
    InvalidCharacter { symbol: String, character: char },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelParseError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    #[error("Invalid channel parameter in '{0}'")]
    InvalidParameter(String),
    #[error("Invalid symbol in channel '{channel}': {source}")]
    InvalidSymbol {
        channel: String,
        #[source]
        source: SymbolError,
    },
}

// ---------------------------------------------------------------------------
// Snapshot Provider Trait
// ---------------------------------------------------------------------------

/// Errors that can occur during REST operations.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Response is missing the sequence header")]
    MissingSequence,
}

/// Source of full order book snapshots, used to seed and resync local books.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn order_book_snapshot(
        &self,
        symbol: &str,
        depth: OrderBookDepth,
    ) -> Result<OrderBookSnapshot, RestError>;
}
