use anyhow::{Context, Result};
use bittrex_orderbook::SyncOptions;
use bittrex_rest::RestClientOptions;
use bittrex_stream::{ApiCredentials, SocketClientOptions};
use serde::Deserialize;
use std::path::Path;

/// Optional TOML configuration. Every section falls back to its defaults.
///
/// ```toml
/// [socket]
/// combine_target = 20
///
/// [rest]
/// timeout_ms = 5000
///
/// [sync]
/// snapshot_delay_ms = 500
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub socket: SocketClientOptions,
    pub rest: RestClientOptions,
    pub sync: SyncOptions,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Credentials from the command line or environment win over the file.
    pub fn apply_credentials(&mut self, key: Option<String>, secret: Option<String>) {
        if let (Some(key), Some(secret)) = (key, secret) {
            self.socket.credentials = Some(ApiCredentials::new(key, secret));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
            [socket]
            combine_target = 20

            [sync]
            snapshot_delay_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.socket.combine_target, 20);
        assert_eq!(config.socket.max_connections, 5);
        assert_eq!(config.socket.hub_name, "c3");
        assert_eq!(config.rest.base_url, "https://api.bittrex.com");
        assert_eq!(config.sync.snapshot_delay_ms, 500);
        assert_eq!(config.sync.reconnect_delay_ms, 1_000);
    }

    #[test]
    fn test_env_credentials_override() {
        let mut config = CliConfig::default();
        config.apply_credentials(Some("key".to_string()), None);
        assert!(config.socket.credentials.is_none());

        config.apply_credentials(Some("key".to_string()), Some("secret".to_string()));
        assert_eq!(config.socket.credentials.unwrap().key, "key");
    }
}
