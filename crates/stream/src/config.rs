use serde::{Deserialize, Serialize};

use crate::auth::ApiCredentials;

/// Configuration for the socket client. Passed at construction; there is no
/// process-wide default instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketClientOptions {
    /// Hub endpoint, without the `/connect` suffix.
    pub base_url: String,
    /// Hub name selected on connect.
    pub hub_name: String,
    /// Subscriptions a connection takes before a new connection is preferred.
    pub combine_target: usize,
    /// Ceiling on concurrently open connections.
    pub max_connections: usize,
    /// Required for private channels (orders, balances, executions, ...).
    pub credentials: Option<ApiCredentials>,
}

impl Default for SocketClientOptions {
    fn default() -> Self {
        Self {
            base_url: "wss://socket-v3.bittrex.com/signalr".to_string(),
            hub_name: "c3".to_string(),
            combine_target: 10,
            max_connections: 5,
            credentials: None,
        }
    }
}

impl SocketClientOptions {
    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}
