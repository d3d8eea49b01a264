//! Seam between the subscription layer and the hub transport.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::protocol::Envelope;

/// What a transport can do. Callers check these before relying on an
/// operation instead of discovering it at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Request/response hub invocations (`invoke`).
    pub invoke: bool,
    /// Sending raw text frames (`send_text`).
    pub raw_text: bool,
}

/// Inbound transport notifications, delivered in order on one channel per
/// connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(Envelope),
    Closed { reason: String },
}

/// A connected hub RPC transport.
#[async_trait]
pub trait HubTransport: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    /// Invoke a hub method and wait for its result.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, StreamError>;

    /// Send a raw text frame. Only meaningful when `capabilities().raw_text`.
    async fn send_text(&self, _text: String) -> Result<(), StreamError> {
        Err(StreamError::Unsupported("raw text frames"))
    }

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// An established transport plus its inbound event queue.
pub struct TransportConnection {
    pub transport: Arc<dyn HubTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports. The registry calls this whenever it needs a new
/// connection.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, base_url: &str, hub: &str) -> Result<TransportConnection, StreamError>;
}
