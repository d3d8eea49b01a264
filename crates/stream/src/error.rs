use bittrex_core::{ChannelParseError, SymbolError};

/// Errors that can occur during streaming operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected")]
    Disconnected,
    #[error("Invocation of '{method}' failed: {message}")]
    Invocation { method: String, message: String },
    #[error("Subscription to '{channel}' rejected: {error_code}")]
    SubscriptionRejected { channel: String, error_code: String },
    #[error("Malformed server response: {0}")]
    MalformedResponse(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Credentials are required to subscribe to '{0}'")]
    CredentialsRequired(String),
    #[error("No channels requested")]
    NoChannels,
    #[error("Subscription cancelled")]
    Cancelled,
    #[error("Transport does not support {0}")]
    Unsupported(&'static str),
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),
    #[error("Invalid channel: {0}")]
    InvalidChannel(#[from] ChannelParseError),
    #[error("Serialization error: {0}")]
    Serialization(String),
}
