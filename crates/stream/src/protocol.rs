use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hub method that carries authentication requests.
pub const AUTHENTICATE_METHOD: &str = "Authenticate";

/// Server push announcing that the connection's authentication is about to
/// expire.
pub const AUTHENTICATION_EXPIRING: &str = "authenticationExpiring";

/// Multiplexed inbound hub message.
///
/// `A[0]` holds the base64(deflate(JSON)) payload; heartbeats carry no
/// arguments at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "M", default)]
    pub method: Option<String>,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

impl Envelope {
    pub fn new(method: impl Into<String>, payload: Option<String>) -> Self {
        Self {
            method: Some(method.into()),
            args: payload.map(Value::String).into_iter().collect(),
        }
    }

    /// The encoded payload string, if the message has one.
    pub fn payload(&self) -> Option<&str> {
        self.args.first().and_then(Value::as_str)
    }
}

/// Subscribe/unsubscribe request sent to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HubRequest {
    pub request_name: String,
    pub parameters: Vec<Value>,
}

impl HubRequest {
    pub fn subscribe(channels: &[String]) -> Self {
        Self::channel_request("subscribe", channels)
    }

    pub fn unsubscribe(channels: &[String]) -> Self {
        Self::channel_request("unsubscribe", channels)
    }

    fn channel_request(name: &str, channels: &[String]) -> Self {
        let names = channels.iter().cloned().map(Value::String).collect();
        Self {
            request_name: name.to_string(),
            parameters: vec![Value::Array(names)],
        }
    }
}

/// Per-channel confirmation returned by subscribe/unsubscribe, and the
/// result shape of `Authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubResult {
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
}

impl HubResult {
    pub fn error_code(&self) -> String {
        self.error_code
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}
