//! Streaming layer for the Bittrex v3 hub socket API.
//!
//! Subscriptions are batched onto a small pool of hub connections. Inbound
//! messages carry no subscription id, so each one is decoded and routed to
//! the subscriptions whose channel it structurally matches.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod subscription;
pub mod transport;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::ApiCredentials;
pub use client::BittrexSocketClient;
pub use config::SocketClientOptions;
pub use connection::SocketConnection;
pub use error::StreamError;
pub use protocol::Envelope;
pub use router::InboundMessage;
pub use subscription::SubscriptionHandle;
pub use transport::{
    HubTransport, TransportCapabilities, TransportConnection, TransportEvent, TransportFactory,
};
pub use ws::WsHubTransportFactory;
