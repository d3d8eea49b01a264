//! In-memory hub transport for tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::codec;
use crate::error::StreamError;
use crate::protocol::Envelope;
use crate::transport::{
    HubTransport, TransportCapabilities, TransportConnection, TransportEvent, TransportFactory,
};

pub type Responder = Arc<dyn Fn(&str, &[Value]) -> Result<Value, StreamError> + Send + Sync>;

/// Accepts every channel and every authentication.
pub fn accept_all() -> Responder {
    Arc::new(|method: &str, args: &[Value]| match method {
        "Authenticate" => Ok(json!({"Success": true, "ErrorCode": null})),
        _ => {
            let count = args
                .first()
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            Ok(Value::Array(
                (0..count)
                    .map(|_| json!({"Success": true, "ErrorCode": null}))
                    .collect(),
            ))
        }
    })
}

/// Rejects subscribe requests for `channel`, accepts everything else.
pub fn reject_channel(channel: &'static str) -> Responder {
    Arc::new(move |method: &str, args: &[Value]| {
        let names = args.first().and_then(Value::as_array).cloned().unwrap_or_default();
        if method == "subscribe" {
            Ok(Value::Array(
                names
                    .iter()
                    .map(|name| {
                        if name.as_str() == Some(channel) {
                            json!({"Success": false, "ErrorCode": "INVALID_CHANNEL"})
                        } else {
                            json!({"Success": true, "ErrorCode": null})
                        }
                    })
                    .collect(),
            ))
        } else {
            accept_all()(method, args)
        }
    })
}

pub struct MockTransport {
    responder: Responder,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: AtomicBool,
    /// While `true`, subscribe invocations wait.
    hold: Arc<watch::Sender<bool>>,
}

impl MockTransport {
    pub fn push(&self, envelope: Envelope) {
        let _ = self.events.send(TransportEvent::Message(envelope));
    }

    pub fn push_payload(&self, method: &str, payload: &Value) {
        let encoded = codec::encode(&payload.to_string()).unwrap();
        self.push(Envelope::new(method, Some(encoded)));
    }

    pub fn drop_connection(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self, method: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

#[async_trait]
impl HubTransport for MockTransport {
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            invoke: true,
            raw_text: false,
        }
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, StreamError> {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), args.clone()));
        if method == "subscribe" {
            let mut held = self.hold.subscribe();
            let _ = held.wait_for(|held| !*held).await;
        }
        (self.responder)(method, &args)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Hands out [`MockTransport`]s and keeps them for inspection.
pub struct MockFactory {
    responder: Responder,
    hold: Arc<watch::Sender<bool>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn new(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            responder,
            hold: Arc::new(watch::Sender::new(false)),
            transports: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe invocations on every transport wait until
    /// [`release_subscribes`](Self::release_subscribes).
    pub fn hold_subscribes(&self) {
        self.hold.send_replace(true);
    }

    pub fn release_subscribes(&self) {
        self.hold.send_replace(false);
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().unwrap().clone()
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.transports.lock().unwrap()[index])
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn connect(&self, _base_url: &str, _hub: &str) -> Result<TransportConnection, StreamError> {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            responder: Arc::clone(&self.responder),
            invocations: Mutex::new(Vec::new()),
            events,
            open: AtomicBool::new(true),
            hold: Arc::clone(&self.hold),
        });
        self.transports.lock().unwrap().push(Arc::clone(&transport));
        Ok(TransportConnection {
            transport,
            events: rx,
        })
    }
}
