//! Subscription registry and connection placement.

use bittrex_core::{Channel, ConnectionEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SocketClientOptions;
use crate::connection::{Reservation, SocketConnection};
use crate::error::StreamError;
use crate::subscription::{GenericHandler, MessageHandler, Subscription, SubscriptionHandle};
use crate::transport::TransportFactory;

/// Tracks open connections, the subscriptions placed on them, and the
/// generic handlers every connection consults.
pub struct SubscriptionRegistry {
    options: SocketClientOptions,
    factory: Arc<dyn TransportFactory>,
    connections: RwLock<Vec<Arc<SocketConnection>>>,
    generic_handlers: Arc<RwLock<Vec<GenericHandler>>>,
    /// Serializes connection selection so concurrent subscribes don't all
    /// open new connections at once.
    placement: Mutex<()>,
    events: broadcast::Sender<ConnectionEvent>,
    next_connection_id: AtomicU64,
    next_subscription_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(
        options: SocketClientOptions,
        factory: Arc<dyn TransportFactory>,
        generic_handlers: Vec<GenericHandler>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            options,
            factory,
            connections: RwLock::new(Vec::new()),
            generic_handlers: Arc::new(RwLock::new(generic_handlers)),
            placement: Mutex::new(()),
            events,
            next_connection_id: AtomicU64::new(1),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &SocketClientOptions {
        &self.options
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Open connections. Connections torn down by the transport are not
    /// counted even before the next placement prunes them.
    pub async fn connection_count(&self) -> usize {
        self.connections
            .read()
            .await
            .iter()
            .filter(|c| c.is_open())
            .count()
    }

    /// Subscribe to `channels` as one batch. Resolves once the server has
    /// confirmed every channel.
    pub async fn subscribe(
        self: &Arc<Self>,
        channels: Vec<Channel>,
        authenticated: bool,
        handler: MessageHandler,
        cancel: Option<CancellationToken>,
    ) -> Result<SubscriptionHandle, StreamError> {
        if authenticated && self.options.credentials.is_none() {
            let name = channels
                .first()
                .map(Channel::to_string)
                .unwrap_or_default();
            return Err(StreamError::CredentialsRequired(name));
        }
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(StreamError::Cancelled);
        }

        let reservation = self.connection_for(authenticated).await?;
        let connection = Arc::clone(reservation.connection());
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let subscription = Arc::new(Subscription::new(id, channels, authenticated, handler));
        let subscribed = connection
            .subscribe(Arc::clone(&subscription), cancel.as_ref())
            .await;
        drop(reservation);
        subscribed?;

        let handle = SubscriptionHandle {
            id,
            connection_id: connection.id(),
            channels: subscription.channel_names(),
        };

        // Cancellation after confirmation tears the subscription down.
        if let Some(token) = cancel {
            let registry = Arc::clone(self);
            let closed = subscription.closed();
            let handle = handle.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(subscription_id = handle.id, "Subscription cancelled, unsubscribing");
                        registry.unsubscribe(&handle).await;
                    }
                    _ = closed.cancelled() => {}
                }
            });
        }

        Ok(handle)
    }

    /// Unsubscribe. Returns the server's verdict; never errors.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let connection = self
            .connections
            .read()
            .await
            .iter()
            .find(|c| c.id() == handle.connection_id)
            .cloned();
        let Some(connection) = connection else {
            return false;
        };

        let acknowledged = connection.unsubscribe(handle.id).await;
        if connection.load().await == 0 {
            let _placement = self.placement.lock().await;
            if connection.load().await == 0 {
                self.connections
                    .write()
                    .await
                    .retain(|c| c.id() != connection.id());
                connection.close().await;
                info!(connection_id = connection.id(), "Closed idle connection");
            }
        }
        acknowledged
    }

    pub async fn unsubscribe_all(&self) {
        let connections: Vec<Arc<SocketConnection>> =
            self.connections.write().await.drain(..).collect();
        for connection in connections {
            connection.close().await;
        }
    }

    /// Pick a connection for a new subscription: the least loaded open
    /// connection below the combine target, else a new connection while
    /// under the ceiling, else the least loaded open connection. The slot is
    /// reserved before the placement lock is released.
    async fn connection_for(&self, authenticated: bool) -> Result<Reservation, StreamError> {
        let _placement = self.placement.lock().await;

        let open: Vec<Arc<SocketConnection>> = {
            let mut connections = self.connections.write().await;
            connections.retain(|c| c.is_open());
            connections.clone()
        };

        let mut loads = Vec::with_capacity(open.len());
        for connection in &open {
            loads.push((Arc::clone(connection), connection.load().await));
        }

        let spare = loads
            .iter()
            .filter(|(c, load)| {
                (!authenticated || c.is_authenticated()) && *load < self.options.combine_target
            })
            .min_by_key(|(_, load)| *load);
        if let Some((connection, _)) = spare {
            return Ok(connection.reserve());
        }

        if open.len() < self.options.max_connections {
            return Ok(self.open_connection(authenticated).await?.reserve());
        }

        // At the ceiling: fall back to the least loaded connection,
        // authenticating it first if needed.
        let (connection, _) = loads
            .into_iter()
            .min_by_key(|(c, load)| (authenticated && !c.is_authenticated(), *load))
            .ok_or_else(|| StreamError::ConnectionFailed("no connections available".to_string()))?;
        if authenticated && !connection.is_authenticated() {
            if let Some(credentials) = &self.options.credentials {
                connection.authenticate(credentials).await?;
            }
        }
        Ok(connection.reserve())
    }

    async fn open_connection(&self, authenticated: bool) -> Result<Arc<SocketConnection>, StreamError> {
        let established = self
            .factory
            .connect(&self.options.base_url, &self.options.hub_name)
            .await?;
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(SocketConnection::new(
            id,
            established.transport,
            self.events.clone(),
        ));
        connection.spawn_dispatch(established.events, Arc::clone(&self.generic_handlers));

        if authenticated {
            if let Some(credentials) = &self.options.credentials {
                if let Err(e) = connection.authenticate(credentials).await {
                    connection.close().await;
                    return Err(e);
                }
            }
        }

        info!(connection_id = id, authenticated, "Opened connection");
        self.connections.write().await.push(Arc::clone(&connection));
        let _ = self.events.send(ConnectionEvent::Connected { connection_id: id });
        Ok(connection)
    }
}
