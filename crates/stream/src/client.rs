use bittrex_core::*;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::SocketClientOptions;
use crate::connection::SocketConnection;
use crate::error::StreamError;
use crate::protocol::{Envelope, AUTHENTICATION_EXPIRING};
use crate::registry::SubscriptionRegistry;
use crate::subscription::{
    heartbeat_handler, typed_handler, GenericHandler, MessageHandler, SubscriptionHandle,
};
use crate::transport::TransportFactory;
use crate::ws::WsHubTransportFactory;

/// Streaming client for the Bittrex v3 socket API.
///
/// Every `subscribe_*` call resolves once the server has confirmed all
/// requested channels, and returns a handle for [`unsubscribe`].
///
/// [`unsubscribe`]: BittrexSocketClient::unsubscribe
#[derive(Clone)]
pub struct BittrexSocketClient {
    registry: Arc<SubscriptionRegistry>,
}

impl BittrexSocketClient {
    pub fn new(options: SocketClientOptions) -> Self {
        Self::with_transport(options, Arc::new(WsHubTransportFactory::default()))
    }

    pub fn with_transport(options: SocketClientOptions, factory: Arc<dyn TransportFactory>) -> Self {
        let mut generic_handlers = Vec::new();
        if let Some(credentials) = options.credentials.clone() {
            generic_handlers.push(GenericHandler::new(
                AUTHENTICATION_EXPIRING,
                Arc::new(move |_envelope: &Envelope, connection: &Arc<SocketConnection>| {
                    let connection = Arc::clone(connection);
                    let credentials = credentials.clone();
                    tokio::spawn(async move {
                        connection.reauthenticate(&credentials).await;
                    });
                }),
            ));
        }

        Self {
            registry: Arc::new(SubscriptionRegistry::new(options, factory, generic_handlers)),
        }
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.registry.connection_events()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }

    // -----------------------------------------------------------------------
    // Public channels
    // -----------------------------------------------------------------------

    pub async fn subscribe_heartbeat<F>(&self, handler: F) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<Heartbeat>) + Send + Sync + 'static,
    {
        self.subscribe_raw(vec![Channel::Heartbeat], heartbeat_handler(handler), None)
            .await
    }

    pub async fn subscribe_market_summaries<F>(
        &self,
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<MarketSummariesUpdate>) + Send + Sync + 'static,
    {
        self.subscribe(vec![Channel::MarketSummaries], handler).await
    }

    pub async fn subscribe_market_summary<F>(
        &self,
        symbols: &[&str],
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<MarketSummary>) + Send + Sync + 'static,
    {
        let channels = symbol_channels(symbols, Channel::MarketSummary)?;
        self.subscribe(channels, handler).await
    }

    pub async fn subscribe_tickers<F>(&self, handler: F) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<TickersUpdate>) + Send + Sync + 'static,
    {
        self.subscribe(vec![Channel::Tickers], handler).await
    }

    pub async fn subscribe_ticker<F>(
        &self,
        symbols: &[&str],
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<Ticker>) + Send + Sync + 'static,
    {
        let channels = symbol_channels(symbols, Channel::Ticker)?;
        self.subscribe(channels, handler).await
    }

    pub async fn subscribe_trades<F>(
        &self,
        symbols: &[&str],
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<TradesUpdate>) + Send + Sync + 'static,
    {
        let channels = symbol_channels(symbols, Channel::Trade)?;
        self.subscribe(channels, handler).await
    }

    pub async fn subscribe_order_book<F>(
        &self,
        symbols: &[&str],
        depth: OrderBookDepth,
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<OrderBookUpdate>) + Send + Sync + 'static,
    {
        self.subscribe_order_book_with_cancel(symbols, depth, handler, None)
            .await
    }

    pub async fn subscribe_order_book_with_cancel<F>(
        &self,
        symbols: &[&str],
        depth: OrderBookDepth,
        handler: F,
        cancel: Option<CancellationToken>,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<OrderBookUpdate>) + Send + Sync + 'static,
    {
        let channels = symbol_channels(symbols, |symbol| Channel::OrderBook { symbol, depth })?;
        self.subscribe_raw(channels, typed_handler(handler), cancel)
            .await
    }

    pub async fn subscribe_candles<F>(
        &self,
        symbols: &[&str],
        interval: CandleInterval,
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<CandleUpdate>) + Send + Sync + 'static,
    {
        let channels = symbol_channels(symbols, |symbol| Channel::Candle { symbol, interval })?;
        self.subscribe(channels, handler).await
    }

    // -----------------------------------------------------------------------
    // Private channels (require credentials)
    // -----------------------------------------------------------------------

    pub async fn subscribe_orders<F>(&self, handler: F) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<OrderUpdate>) + Send + Sync + 'static,
    {
        self.subscribe(vec![Channel::Order], handler).await
    }

    pub async fn subscribe_balances<F>(&self, handler: F) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<BalanceUpdate>) + Send + Sync + 'static,
    {
        self.subscribe(vec![Channel::Balance], handler).await
    }

    pub async fn subscribe_executions<F>(&self, handler: F) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<ExecutionUpdate>) + Send + Sync + 'static,
    {
        self.subscribe(vec![Channel::Execution], handler).await
    }

    pub async fn subscribe_deposits<F>(&self, handler: F) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<DepositUpdate>) + Send + Sync + 'static,
    {
        self.subscribe(vec![Channel::Deposit], handler).await
    }

    pub async fn subscribe_conditional_orders<F>(
        &self,
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        F: Fn(DataEvent<ConditionalOrderUpdate>) + Send + Sync + 'static,
    {
        self.subscribe(vec![Channel::ConditionalOrder], handler).await
    }

    // -----------------------------------------------------------------------
    // Generic
    // -----------------------------------------------------------------------

    /// Subscribe to arbitrary channels whose payloads deserialize into `T`.
    pub async fn subscribe<T, F>(
        &self,
        channels: Vec<Channel>,
        handler: F,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(DataEvent<T>) + Send + Sync + 'static,
    {
        self.subscribe_raw(channels, typed_handler(handler), None).await
    }

    /// Like [`subscribe`](Self::subscribe), but abandons the request when
    /// `cancel` fires. Cancelling after confirmation unsubscribes.
    pub async fn subscribe_with_cancel<T, F>(
        &self,
        channels: Vec<Channel>,
        handler: F,
        cancel: CancellationToken,
    ) -> Result<SubscriptionHandle, StreamError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(DataEvent<T>) + Send + Sync + 'static,
    {
        self.subscribe_raw(channels, typed_handler(handler), Some(cancel))
            .await
    }

    async fn subscribe_raw(
        &self,
        channels: Vec<Channel>,
        handler: MessageHandler,
        cancel: Option<CancellationToken>,
    ) -> Result<SubscriptionHandle, StreamError> {
        if channels.is_empty() {
            return Err(StreamError::NoChannels);
        }
        let authenticated = channels.iter().any(Channel::requires_auth);
        self.registry
            .subscribe(channels, authenticated, handler, cancel)
            .await
    }

    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.registry.unsubscribe(handle).await
    }

    /// Unsubscribe everything and close all connections.
    pub async fn close(&self) {
        self.registry.unsubscribe_all().await;
    }
}

/// Validate every symbol and build one channel per symbol.
fn symbol_channels<F>(symbols: &[&str], build: F) -> Result<Vec<Channel>, StreamError>
where
    F: Fn(String) -> Channel,
{
    symbols
        .iter()
        .map(|symbol| -> Result<Channel, StreamError> {
            validate_symbol(symbol)?;
            Ok(build(symbol.to_string()))
        })
        .collect()
}
