use async_trait::async_trait;
use bittrex_core::{ConnectionEvent, OrderBookDepth, OrderBookUpdate};
use bittrex_stream::{BittrexSocketClient, StreamError, SubscriptionHandle};
use tokio::sync::{broadcast, mpsc};

/// Source of streamed order book deltas for the synchronizer.
#[async_trait]
pub trait DeltaFeed: Send + Sync {
    /// Subscribe to `orderbook_{symbol}_{depth}` and forward every delta to
    /// `sink`. Resolves once the subscription is confirmed.
    async fn subscribe_deltas(
        &self,
        symbol: &str,
        depth: OrderBookDepth,
        sink: mpsc::UnboundedSender<OrderBookUpdate>,
    ) -> Result<SubscriptionHandle, StreamError>;

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool;

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[async_trait]
impl DeltaFeed for BittrexSocketClient {
    async fn subscribe_deltas(
        &self,
        symbol: &str,
        depth: OrderBookDepth,
        sink: mpsc::UnboundedSender<OrderBookUpdate>,
    ) -> Result<SubscriptionHandle, StreamError> {
        self.subscribe_order_book(&[symbol], depth, move |event| {
            let _ = sink.send(event.data);
        })
        .await
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        BittrexSocketClient::unsubscribe(self, handle).await
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        BittrexSocketClient::connection_events(self)
    }
}
