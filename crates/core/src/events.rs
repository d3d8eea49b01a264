use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed streaming update delivered to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEvent<T> {
    /// Channel name the update was routed to (e.g. `ticker_BTC-USD`).
    pub channel: String,
    pub data: T,
    pub received_at: DateTime<Utc>,
}

impl<T> DataEvent<T> {
    pub fn new(channel: impl Into<String>, data: T) -> Self {
        Self {
            channel: channel.into(),
            data,
            received_at: Utc::now(),
        }
    }
}

/// Socket connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connected { connection_id: u64 },
    Lost { connection_id: u64, reason: String },
    Reauthenticated { connection_id: u64 },
    ReauthenticationFailed { connection_id: u64, reason: String },
}

impl ConnectionEvent {
    pub fn connection_id(&self) -> u64 {
        match self {
            ConnectionEvent::Connected { connection_id }
            | ConnectionEvent::Lost { connection_id, .. }
            | ConnectionEvent::Reauthenticated { connection_id }
            | ConnectionEvent::ReauthenticationFailed { connection_id, .. } => *connection_id,
        }
    }
}
