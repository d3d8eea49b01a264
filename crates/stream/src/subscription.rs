use bittrex_core::{Channel, DataEvent, Heartbeat};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::connection::SocketConnection;
use crate::protocol::Envelope;
use crate::router::InboundMessage;

/// Type-erased per-subscription callback. Receives the subscribed channel the
/// message matched and the decoded message.
pub type MessageHandler = Arc<dyn Fn(&Channel, &InboundMessage) + Send + Sync>;

/// Callback for generic handlers. Gets the connection the envelope arrived on
/// so it can act on it (e.g. re-authenticate).
pub type GenericCallback = Arc<dyn Fn(&Envelope, &Arc<SocketConnection>) + Send + Sync>;

/// Wrap a typed callback: deserialize the payload into `T` and deliver it
/// as a [`DataEvent`].
pub fn typed_handler<T, F>(handler: F) -> MessageHandler
where
    T: DeserializeOwned + 'static,
    F: Fn(DataEvent<T>) + Send + Sync + 'static,
{
    Arc::new(move |channel: &Channel, message: &InboundMessage| {
        let Some(payload) = message.payload.as_deref() else {
            return;
        };
        match serde_json::from_str::<T>(payload) {
            Ok(data) => handler(DataEvent::new(channel.to_string(), data)),
            Err(e) => warn!(
                channel = %channel,
                error = %e,
                "Failed to deserialize streamed update"
            ),
        }
    })
}

/// Heartbeats carry no payload; the timestamp is taken on arrival.
pub fn heartbeat_handler<F>(handler: F) -> MessageHandler
where
    F: Fn(DataEvent<Heartbeat>) + Send + Sync + 'static,
{
    Arc::new(move |channel: &Channel, _message: &InboundMessage| {
        handler(DataEvent::new(
            channel.to_string(),
            Heartbeat {
                timestamp: Utc::now(),
            },
        ))
    })
}

/// An active channel subscription, owned by the connection it lives on.
pub struct Subscription {
    pub id: u64,
    channels: Vec<Channel>,
    pub authenticated: bool,
    handler: MessageHandler,
    confirmed: AtomicBool,
    closed: CancellationToken,
}

impl Subscription {
    pub fn new(id: u64, channels: Vec<Channel>, authenticated: bool, handler: MessageHandler) -> Self {
        Self {
            id,
            channels,
            authenticated,
            handler,
            confirmed: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(Channel::to_string).collect()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }

    pub(crate) fn confirm(&self) {
        self.confirmed.store(true, Ordering::SeqCst);
    }

    /// Cancelled once the subscription is removed from its connection.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    /// Deliver `message` if it belongs to one of this subscription's channels.
    pub fn deliver(&self, message: &InboundMessage) -> bool {
        match self.channels.iter().find(|channel| message.matches(channel)) {
            Some(channel) => {
                (self.handler)(channel, message);
                true
            }
            None => false,
        }
    }
}

/// Caller-side reference to a confirmed subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub connection_id: u64,
    pub channels: Vec<String>,
}

/// Always-matching handler keyed on a hub method name rather than a channel.
#[derive(Clone)]
pub struct GenericHandler {
    pub identifier: String,
    pub callback: GenericCallback,
}

impl GenericHandler {
    pub fn new(identifier: impl Into<String>, callback: GenericCallback) -> Self {
        Self {
            identifier: identifier.into(),
            callback,
        }
    }
}
