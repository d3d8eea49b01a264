//! Hub transport over `tokio-tungstenite`.
//!
//! Speaks the legacy hub JSON framing: invocations go out as
//! `{"H": hub, "M": method, "A": args, "I": id}`, results come back as
//! `{"R": value, "I": id}` or `{"E": error, "I": id}`, and server pushes
//! arrive as `{"M": [envelope, ...]}`. Empty `{}` frames are keep-alives.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::error::StreamError;
use crate::protocol::Envelope;
use crate::transport::{
    HubTransport, TransportCapabilities, TransportConnection, TransportEvent, TransportFactory,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

#[derive(Debug, Serialize)]
struct Invocation<'a> {
    #[serde(rename = "H")]
    hub: &'a str,
    #[serde(rename = "M")]
    method: &'a str,
    #[serde(rename = "A")]
    args: Vec<Value>,
    #[serde(rename = "I")]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct HubFrame {
    #[serde(rename = "I", default)]
    invocation_id: Option<String>,
    #[serde(rename = "R", default)]
    result: Option<Value>,
    #[serde(rename = "E", default)]
    error: Option<String>,
    #[serde(rename = "M", default)]
    messages: Option<Vec<Envelope>>,
}

const CLIENT_PROTOCOL: &str = "1.5";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NegotiateResponse {
    connection_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartResponse {
    response: String,
}

/// HTTP(S) root of the hub endpoint, used for negotiate and start.
pub fn http_base(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        base.to_string()
    }
}

/// WebSocket root of the hub endpoint, used for connect.
pub fn ws_base(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    }
}

/// Query string shared by the handshake steps. `hub` is selected through
/// `connectionData`.
fn handshake_query(hub: &str, token: Option<&str>) -> String {
    let connection_data = format!("[{{\"name\":\"{}\"}}]", hub);
    let mut query = format!("transport=webSockets&clientProtocol={}", CLIENT_PROTOCOL);
    if let Some(token) = token {
        query.push_str("&connectionToken=");
        query.push_str(&urlencoding::encode(token));
    }
    query.push_str("&connectionData=");
    query.push_str(&urlencoding::encode(&connection_data));
    query
}

pub fn negotiate_url(base_url: &str, hub: &str) -> String {
    format!("{}/negotiate?{}", http_base(base_url), handshake_query(hub, None))
}

/// Build the hub connect URL for a negotiated connection token.
pub fn connection_url(base_url: &str, hub: &str, token: &str) -> String {
    format!("{}/connect?{}", ws_base(base_url), handshake_query(hub, Some(token)))
}

pub fn start_url(base_url: &str, hub: &str, token: &str) -> String {
    format!("{}/start?{}", http_base(base_url), handshake_query(hub, Some(token)))
}

/// Opens [`WsHubTransport`] connections: negotiate a connection token over
/// HTTP, upgrade on `/connect`, then call `/start` before handing the
/// transport out.
#[derive(Debug, Clone, Default)]
pub struct WsHubTransportFactory {
    http: reqwest::Client,
}

impl WsHubTransportFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn negotiate(&self, base_url: &str, hub: &str) -> Result<String, StreamError> {
        let response: NegotiateResponse = self
            .http
            .get(negotiate_url(base_url, hub))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| StreamError::ConnectionFailed(format!("Negotiate failed: {}", e)))?
            .json()
            .await
            .map_err(|e| StreamError::MalformedResponse(format!("negotiate: {}", e)))?;
        Ok(response.connection_token)
    }

    async fn start(&self, base_url: &str, hub: &str, token: &str) -> Result<(), StreamError> {
        let response: StartResponse = self
            .http
            .get(start_url(base_url, hub, token))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| StreamError::ConnectionFailed(format!("Start failed: {}", e)))?
            .json()
            .await
            .map_err(|e| StreamError::MalformedResponse(format!("start: {}", e)))?;
        if response.response != "started" {
            return Err(StreamError::ConnectionFailed(format!(
                "Start returned '{}'",
                response.response
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportFactory for WsHubTransportFactory {
    async fn connect(&self, base_url: &str, hub: &str) -> Result<TransportConnection, StreamError> {
        info!("Connecting to hub {} at {}", hub, base_url);
        let token = self.negotiate(base_url, hub).await?;
        debug!(hub, "Negotiated connection token");

        let (ws_stream, _) = connect_async(connection_url(base_url, hub, &token).as_str())
            .await
            .map_err(|e| StreamError::ConnectionFailed(format!("WebSocket connect failed: {}", e)))?;
        let (write, mut read) = ws_stream.split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        let transport = Arc::new(WsHubTransport {
            hub: hub.to_string(),
            sink: Mutex::new(write),
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(0),
            open: Arc::clone(&open),
        });

        tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &pending, &event_tx).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read error: {}", e),
                    None => break "stream ended".to_string(),
                };
            };

            open.store(false, Ordering::SeqCst);
            for (_, waiter) in pending.lock().await.drain() {
                let _ = waiter.send(Err(reason.clone()));
            }
            debug!(reason = %reason, "Hub transport read loop finished");
            let _ = event_tx.send(TransportEvent::Closed { reason });
        });

        if let Err(e) = self.start(base_url, hub, &token).await {
            transport.close().await;
            return Err(e);
        }

        Ok(TransportConnection {
            transport,
            events: event_rx,
        })
    }
}

async fn handle_frame(
    text: &str,
    pending: &PendingMap,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let frame: HubFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Ignoring unparseable hub frame");
            return;
        }
    };

    if let Some(id) = frame.invocation_id.as_deref().and_then(|id| id.parse::<u64>().ok()) {
        if let Some(waiter) = pending.lock().await.remove(&id) {
            let outcome = match frame.error {
                Some(error) => Err(error),
                None => Ok(frame.result.unwrap_or(Value::Null)),
            };
            let _ = waiter.send(outcome);
        }
        return;
    }

    match frame.messages {
        Some(messages) => {
            for envelope in messages {
                let _ = events.send(TransportEvent::Message(envelope));
            }
        }
        None => trace!("Keep-alive frame"),
    }
}

/// Hub RPC over a single WebSocket.
pub struct WsHubTransport {
    hub: String,
    sink: Mutex<WsSink>,
    pending: PendingMap,
    next_id: AtomicU64,
    open: Arc<AtomicBool>,
}

impl WsHubTransport {
    async fn write(&self, text: String) -> Result<(), StreamError> {
        if !self.is_open() {
            return Err(StreamError::Disconnected);
        }
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| StreamError::ConnectionFailed(format!("Write error: {}", e)))
    }
}

#[async_trait]
impl HubTransport for WsHubTransport {
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            invoke: true,
            raw_text: true,
        }
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, StreamError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&Invocation {
            hub: &self.hub,
            method,
            args,
            id: id.to_string(),
        })
        .map_err(|e| StreamError::Serialization(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!(method, id, "Invoking hub method");
        if let Err(e) = self.write(frame).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(StreamError::Invocation {
                method: method.to_string(),
                message,
            }),
            Err(_) => Err(StreamError::Disconnected),
        }
    }

    async fn send_text(&self, text: String) -> Result<(), StreamError> {
        self.write(text).await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.sink.lock().await.close().await;
    }
}
