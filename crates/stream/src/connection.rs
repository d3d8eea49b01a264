use bittrex_core::ConnectionEvent;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::auth::ApiCredentials;
use crate::error::StreamError;
use crate::protocol::{Envelope, HubRequest, HubResult, AUTHENTICATE_METHOD};
use crate::router::{self, InboundMessage};
use crate::subscription::{GenericHandler, Subscription};
use crate::transport::{HubTransport, TransportEvent};

/// Placement slot on a [`SocketConnection`], held from connection selection
/// until the subscribe call has registered (or failed).
pub struct Reservation {
    connection: Arc<SocketConnection>,
}

impl Reservation {
    pub fn connection(&self) -> &Arc<SocketConnection> {
        &self.connection
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.connection.reserved.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One hub transport and the subscriptions multiplexed onto it.
pub struct SocketConnection {
    id: u64,
    transport: Arc<dyn HubTransport>,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    authenticated: AtomicBool,
    closed: AtomicBool,
    /// Subscriptions placed here whose subscribe call has not registered yet.
    reserved: AtomicUsize,
    /// Subscribe/unsubscribe hold this shared; authentication holds it
    /// exclusively, so auth state never changes under an in-flight request.
    auth_gate: RwLock<()>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl SocketConnection {
    pub fn new(
        id: u64,
        transport: Arc<dyn HubTransport>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            id,
            transport,
            subscriptions: RwLock::new(Vec::new()),
            authenticated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reserved: AtomicUsize::new(0),
            auth_gate: RwLock::new(()),
            events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_open()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Registered subscriptions plus outstanding reservations. A connection
    /// with a non-zero load is never closed as idle.
    pub async fn load(&self) -> usize {
        self.subscription_count().await + self.reserved.load(Ordering::SeqCst)
    }

    /// Claim a slot for a subscription about to be placed here. The slot is
    /// released when the returned guard drops.
    pub fn reserve(self: &Arc<Self>) -> Reservation {
        self.reserved.fetch_add(1, Ordering::SeqCst);
        Reservation {
            connection: Arc::clone(self),
        }
    }

    /// Start draining the transport's event queue. Messages are dispatched in
    /// arrival order.
    pub fn spawn_dispatch(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        generic_handlers: Arc<RwLock<Vec<GenericHandler>>>,
    ) {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(envelope) => {
                        connection.dispatch(&envelope, &generic_handlers).await;
                    }
                    TransportEvent::Closed { reason } => {
                        connection.teardown(&reason).await;
                        return;
                    }
                }
            }
            connection.teardown("event queue closed").await;
        });
    }

    /// Route one envelope: generic handlers first (identifier match), then
    /// confirmed channel subscriptions (content match).
    pub async fn dispatch(self: &Arc<Self>, envelope: &Envelope, generic_handlers: &RwLock<Vec<GenericHandler>>) {
        let matched: Vec<GenericHandler> = generic_handlers
            .read()
            .await
            .iter()
            .filter(|h| router::matches_identifier(envelope, &h.identifier))
            .cloned()
            .collect();
        if !matched.is_empty() {
            for handler in matched {
                (handler.callback)(envelope, self);
            }
            return;
        }

        let Some(message) = InboundMessage::parse(envelope) else {
            return;
        };

        let subscriptions = self.subscriptions.read().await.clone();
        let mut delivered = false;
        for subscription in subscriptions.iter().filter(|s| s.is_confirmed()) {
            delivered |= subscription.deliver(&message);
        }
        if !delivered {
            trace!(
                connection_id = self.id,
                method = %message.method,
                symbol = ?message.symbol,
                "No subscription matched message"
            );
        }
    }

    /// Register `subscription` and wait for the server to confirm every
    /// channel. Any rejected channel fails the whole call; channels that were
    /// accepted are unsubscribed again.
    pub async fn subscribe(
        &self,
        subscription: Arc<Subscription>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), StreamError> {
        if !self.transport.capabilities().invoke {
            return Err(StreamError::Unsupported("hub invocation"));
        }

        let _gate = self.auth_gate.read().await;
        if !self.is_open() {
            return Err(StreamError::Disconnected);
        }

        let names = subscription.channel_names();
        self.subscriptions.write().await.push(Arc::clone(&subscription));

        let request = HubRequest::subscribe(&names);
        let invocation = self
            .transport
            .invoke(&request.request_name, request.parameters);
        let response = match cancel {
            Some(token) => tokio::select! {
                response = invocation => response,
                _ = token.cancelled() => {
                    debug!(connection_id = self.id, channels = ?names, "Subscribe cancelled before confirmation");
                    self.remove(subscription.id).await;
                    self.spawn_unsubscribe(names);
                    return Err(StreamError::Cancelled);
                }
            },
            None => invocation.await,
        };

        let results = match response.and_then(|value| parse_results(value, names.len())) {
            Ok(results) => results,
            Err(e) => {
                self.remove(subscription.id).await;
                return Err(e);
            }
        };

        let rejected = names
            .iter()
            .zip(&results)
            .find(|(_, result)| !result.success);
        if let Some((channel, result)) = rejected {
            warn!(
                connection_id = self.id,
                channel = %channel,
                error_code = %result.error_code(),
                "Subscription rejected"
            );
            self.remove(subscription.id).await;
            let accepted: Vec<String> = names
                .iter()
                .zip(&results)
                .filter(|(_, result)| result.success)
                .map(|(name, _)| name.clone())
                .collect();
            if !accepted.is_empty() {
                self.spawn_unsubscribe(accepted);
            }
            return Err(StreamError::SubscriptionRejected {
                channel: channel.clone(),
                error_code: result.error_code(),
            });
        }

        subscription.confirm();
        info!(connection_id = self.id, channels = ?names, "Subscribed");
        Ok(())
    }

    /// Remove a subscription and tell the server. Returns whether the server
    /// acknowledged every channel; never errors.
    pub async fn unsubscribe(&self, subscription_id: u64) -> bool {
        let _gate = self.auth_gate.read().await;
        let Some(subscription) = self.remove(subscription_id).await else {
            return false;
        };
        if !self.is_open() {
            return true;
        }

        let names = subscription.channel_names();
        let request = HubRequest::unsubscribe(&names);
        let outcome = self
            .transport
            .invoke(&request.request_name, request.parameters)
            .await
            .and_then(|value| parse_results(value, names.len()));
        match outcome {
            Ok(results) if results.iter().all(|r| r.success) => {
                info!(connection_id = self.id, channels = ?names, "Unsubscribed");
                true
            }
            Ok(results) => {
                let codes: Vec<String> = results
                    .iter()
                    .filter(|r| !r.success)
                    .map(HubResult::error_code)
                    .collect();
                warn!(connection_id = self.id, channels = ?names, errors = ?codes, "Unsubscribe rejected");
                false
            }
            Err(e) => {
                warn!(connection_id = self.id, channels = ?names, error = %e, "Unsubscribe failed");
                false
            }
        }
    }

    /// Run the authentication handshake on this connection.
    pub async fn authenticate(&self, credentials: &ApiCredentials) -> Result<(), StreamError> {
        let _gate = self.auth_gate.write().await;
        self.authenticate_locked(credentials).await
    }

    async fn authenticate_locked(&self, credentials: &ApiCredentials) -> Result<(), StreamError> {
        let args = credentials.authenticate_args(Utc::now().timestamp_millis())?;
        let value = self.transport.invoke(AUTHENTICATE_METHOD, args).await?;
        let result: HubResult = serde_json::from_value(value)
            .map_err(|e| StreamError::MalformedResponse(format!("authenticate: {}", e)))?;
        if !result.success {
            self.authenticated.store(false, Ordering::SeqCst);
            return Err(StreamError::AuthenticationFailed(result.error_code()));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        debug!(connection_id = self.id, "Authenticated");
        Ok(())
    }

    /// Re-run authentication in place, keeping subscriptions. Failures are
    /// logged and reported as a connection event.
    pub async fn reauthenticate(&self, credentials: &ApiCredentials) {
        info!(connection_id = self.id, "Authentication expiring, re-authenticating");
        match self.authenticate(credentials).await {
            Ok(()) => {
                let _ = self.events.send(ConnectionEvent::Reauthenticated {
                    connection_id: self.id,
                });
            }
            Err(e) => {
                error!(connection_id = self.id, error = %e, "Re-authentication failed");
                let _ = self.events.send(ConnectionEvent::ReauthenticationFailed {
                    connection_id: self.id,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Unsubscribe everything and close the transport.
    pub async fn close(&self) {
        let ids: Vec<u64> = self.subscriptions.read().await.iter().map(|s| s.id).collect();
        for id in ids {
            self.unsubscribe(id).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.transport.close().await;
    }

    async fn teardown(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped: Vec<Arc<Subscription>> = self.subscriptions.write().await.drain(..).collect();
        for subscription in &dropped {
            subscription.close();
        }
        warn!(
            connection_id = self.id,
            reason,
            subscriptions = dropped.len(),
            "Connection lost"
        );
        let _ = self.events.send(ConnectionEvent::Lost {
            connection_id: self.id,
            reason: reason.to_string(),
        });
    }

    async fn remove(&self, subscription_id: u64) -> Option<Arc<Subscription>> {
        let mut subscriptions = self.subscriptions.write().await;
        let index = subscriptions.iter().position(|s| s.id == subscription_id)?;
        let subscription = subscriptions.remove(index);
        subscription.close();
        Some(subscription)
    }

    /// Best-effort unsubscribe for channels that have no local subscription
    /// anymore.
    fn spawn_unsubscribe(&self, channels: Vec<String>) {
        let transport = Arc::clone(&self.transport);
        let connection_id = self.id;
        tokio::spawn(async move {
            let request = HubRequest::unsubscribe(&channels);
            if let Err(e) = transport
                .invoke(&request.request_name, request.parameters)
                .await
            {
                debug!(connection_id, channels = ?channels, error = %e, "Cleanup unsubscribe failed");
            }
        });
    }
}

fn parse_results(value: Value, expected: usize) -> Result<Vec<HubResult>, StreamError> {
    let results: Vec<HubResult> = serde_json::from_value(value)
        .map_err(|e| StreamError::MalformedResponse(e.to_string()))?;
    if results.len() != expected {
        return Err(StreamError::MalformedResponse(format!(
            "expected {} confirmations, got {}",
            expected,
            results.len()
        )));
    }
    Ok(results)
}
