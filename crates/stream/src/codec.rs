//! Payload codec for hub messages.
//!
//! Streamed payloads are JSON compressed with raw deflate (no zlib or gzip
//! header) and then base64 encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::warn;

use crate::error::StreamError;

/// Decode a streamed payload into JSON text.
///
/// Returns `None` when the payload is the literal `null` (an update with no
/// data) or when it cannot be decoded. Decode failures are logged, never
/// returned.
pub fn decode(raw: &str) -> Option<String> {
    match try_decode(raw) {
        Ok(text) if text == "null" => None,
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, len = raw.len(), "Dropping undecodable payload");
            None
        }
    }
}

fn try_decode(raw: &str) -> Result<String, String> {
    let compressed = STANDARD
        .decode(raw.trim())
        .map_err(|e| format!("base64: {}", e))?;
    let mut text = String::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .map_err(|e| format!("inflate: {}", e))?;
    Ok(text)
}

/// Encode JSON text the way the exchange does.
pub fn encode(json: &str) -> Result<String, StreamError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(json.as_bytes())
        .map_err(|e| StreamError::Serialization(format!("deflate: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| StreamError::Serialization(format!("deflate: {}", e)))?;
    Ok(STANDARD.encode(compressed))
}
