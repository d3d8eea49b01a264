use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestClientOptions {
    /// API root, without the `/v3` prefix.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RestClientOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.bittrex.com".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl RestClientOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
