use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;
use std::fmt;
use uuid::Uuid;

use crate::error::StreamError;

type HmacSha512 = Hmac<Sha512>;

/// API key pair used to authenticate private channels.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}

impl ApiCredentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    /// Arguments for the hub `Authenticate` invocation:
    /// `[apiKey, timestamp, randomContent, signature]`, where the signature is
    /// hex(HMAC-SHA512(secret, timestamp + randomContent)).
    pub fn authenticate_args(&self, timestamp_ms: i64) -> Result<Vec<Value>, StreamError> {
        let random_content = Uuid::new_v4().to_string();
        let signature = self.sign(&format!("{}{}", timestamp_ms, random_content))?;
        Ok(vec![
            Value::String(self.key.clone()),
            Value::from(timestamp_ms),
            Value::String(random_content),
            Value::String(signature),
        ])
    }

    pub fn sign(&self, content: &str) -> Result<String, StreamError> {
        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|e| StreamError::AuthenticationFailed(e.to_string()))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}
