//! Content-based routing of inbound hub messages.
//!
//! The hub multiplexes every subscription of a connection onto one message
//! stream without correlation ids. An envelope is parsed once into an
//! [`InboundMessage`] (method kind plus the symbol/interval/depth found in
//! its payload) and compared structurally against each subscribed
//! [`Channel`].

use bittrex_core::{CandleInterval, Channel, ChannelKind, OrderBookDepth};
use serde_json::Value;
use tracing::{trace, warn};

use crate::codec;
use crate::protocol::Envelope;

/// Convert a camelCase hub method name to the snake_case form used by the
/// channel grammar (`orderBook` -> `order_book`).
pub fn normalize_method(method: &str) -> String {
    let mut normalized = String::with_capacity(method.len() + 4);
    for (i, c) in method.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                normalized.push('_');
            }
            normalized.push(c.to_ascii_lowercase());
        } else {
            normalized.push(c);
        }
    }
    normalized
}

/// A decoded envelope, ready for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub method: String,
    pub kind: ChannelKind,
    pub symbol: Option<String>,
    pub interval: Option<CandleInterval>,
    pub depth: Option<OrderBookDepth>,
    /// Decoded JSON text. Always `None` for heartbeats.
    pub payload: Option<String>,
}

impl InboundMessage {
    /// Parse an envelope. Returns `None` when the method is missing or
    /// unknown, or when the payload cannot be decoded; such messages are
    /// dropped.
    pub fn parse(envelope: &Envelope) -> Option<Self> {
        let method = envelope.method.as_deref()?;
        let Some(kind) = ChannelKind::from_method(&normalize_method(method)) else {
            trace!(method, "No channel kind for hub method");
            return None;
        };

        if kind == ChannelKind::Heartbeat {
            return Some(Self {
                method: method.to_string(),
                kind,
                symbol: None,
                interval: None,
                depth: None,
                payload: None,
            });
        }

        let payload = codec::decode(envelope.payload()?)?;
        let json: Value = match serde_json::from_str(&payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(method, error = %e, "Dropping payload that is not JSON");
                return None;
            }
        };

        let interval = json
            .get("interval")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        let depth = json
            .get("depth")
            .and_then(Value::as_u64)
            .and_then(|d| u32::try_from(d).ok())
            .and_then(|d| OrderBookDepth::try_from(d).ok());

        Some(Self {
            method: method.to_string(),
            kind,
            symbol: extract_symbol(&json),
            interval,
            depth,
            payload: Some(payload),
        })
    }

    /// Whether this message belongs to `channel`.
    ///
    /// Global channels match on the method alone. Symbol channels require the
    /// exact symbol; candle channels also require the exact interval. Order
    /// book channels compare depth when the payload carries one.
    pub fn matches(&self, channel: &Channel) -> bool {
        if channel.kind() != self.kind {
            return false;
        }
        let symbol = self.symbol.as_deref();
        match channel {
            Channel::MarketSummary(s) | Channel::Ticker(s) | Channel::Trade(s) => {
                symbol == Some(s.as_str())
            }
            Channel::OrderBook {
                symbol: s,
                depth: d,
            } => symbol == Some(s.as_str()) && self.depth.map_or(true, |depth| depth == *d),
            Channel::Candle {
                symbol: s,
                interval: i,
            } => symbol == Some(s.as_str()) && self.interval == Some(*i),
            _ => true,
        }
    }
}

/// Symbol of a payload: `symbol` or `marketSymbol` at the top level, or in
/// the first element of a batched `deltas` array.
fn extract_symbol(json: &Value) -> Option<String> {
    let direct = |v: &Value| {
        v.get("symbol")
            .or_else(|| v.get("marketSymbol"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    direct(json).or_else(|| {
        json.get("deltas")
            .and_then(Value::as_array)
            .and_then(|deltas| deltas.first())
            .and_then(direct)
    })
}

/// Whether `envelope` matches `channel`.
pub fn matches(envelope: &Envelope, channel: &Channel) -> bool {
    InboundMessage::parse(envelope).is_some_and(|message| message.matches(channel))
}

/// Identifier match for generic handlers: plain method-name equality.
pub fn matches_identifier(envelope: &Envelope, identifier: &str) -> bool {
    envelope.method.as_deref() == Some(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AUTHENTICATION_EXPIRING;
    use serde_json::json;

    fn envelope(method: &str, payload: Value) -> Envelope {
        let encoded = codec::encode(&payload.to_string()).unwrap();
        Envelope::new(method, Some(encoded))
    }

    fn channel(name: &str) -> Channel {
        name.parse().unwrap()
    }

    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("orderBook"), "order_book");
        assert_eq!(normalize_method("marketSummaries"), "market_summaries");
        assert_eq!(normalize_method("conditionalOrder"), "conditional_order");
        assert_eq!(normalize_method("heartbeat"), "heartbeat");
    }

    #[test]
    fn test_candle_matches_only_same_interval() {
        let sub = channel("candle_BTC-USD_MINUTE_1");
        let minute = envelope(
            "candle",
            json!({"marketSymbol": "BTC-USD", "interval": "MINUTE_1", "sequence": 5}),
        );
        let five = envelope(
            "candle",
            json!({"marketSymbol": "BTC-USD", "interval": "MINUTE_5", "sequence": 5}),
        );
        assert!(matches(&minute, &sub));
        assert!(!matches(&five, &sub));
    }

    #[test]
    fn test_symbol_channels_need_exact_symbol() {
        let sub = channel("ticker_BTC-USD");
        assert!(matches(&envelope("ticker", json!({"symbol": "BTC-USD"})), &sub));
        assert!(!matches(&envelope("ticker", json!({"symbol": "BTC-USDT"})), &sub));
        assert!(!matches(&envelope("ticker", json!({"symbol": "ETH-USD"})), &sub));
        // same symbol, different family
        assert!(!matches(&envelope("trade", json!({"marketSymbol": "BTC-USD"})), &sub));
        // no symbol in the payload at all
        assert!(!matches(&envelope("ticker", json!({"lastTradeRate": "1"})), &sub));
    }

    #[test]
    fn test_global_channels_match_on_method() {
        let batch = envelope(
            "marketSummaries",
            json!({"sequence": 9, "deltas": [{"symbol": "ETH-BTC"}]}),
        );
        assert!(matches(&batch, &channel("market_summaries")));
        assert!(!matches(&batch, &channel("market_summary_ETH-BTC")));
        assert!(matches(&envelope("balance", json!({"accountId": "a"})), &channel("balance")));
    }

    #[test]
    fn test_symbol_found_in_batched_deltas() {
        let message = InboundMessage::parse(&envelope(
            "tickers",
            json!({"sequence": 1, "deltas": [{"symbol": "LTC-BTC"}, {"symbol": "ETH-BTC"}]}),
        ))
        .unwrap();
        assert_eq!(message.symbol.as_deref(), Some("LTC-BTC"));
    }

    #[test]
    fn test_order_book_depth_is_compared() {
        let update = envelope(
            "orderBook",
            json!({"marketSymbol": "BTC-USD", "depth": 25, "sequence": 101}),
        );
        assert!(matches(&update, &channel("orderbook_BTC-USD_25")));
        assert!(!matches(&update, &channel("orderbook_BTC-USD_500")));
    }

    #[test]
    fn test_heartbeat_matches_without_payload() {
        let heartbeat = Envelope::new("heartbeat", None);
        assert!(matches(&heartbeat, &Channel::Heartbeat));
        let message = InboundMessage::parse(&heartbeat).unwrap();
        assert_eq!(message.payload, None);
    }

    #[test]
    fn test_undecodable_payload_never_matches() {
        let broken = Envelope::new("ticker", Some("%%%".to_string()));
        assert!(!matches(&broken, &channel("ticker_BTC-USD")));
        let empty = Envelope::new("ticker", Some(codec::encode("null").unwrap()));
        assert!(!matches(&empty, &channel("ticker_BTC-USD")));
    }

    #[test]
    fn test_identifier_match_is_independent_of_channels() {
        let expiring = Envelope::new(AUTHENTICATION_EXPIRING, None);
        assert!(matches_identifier(&expiring, AUTHENTICATION_EXPIRING));
        assert!(InboundMessage::parse(&expiring).is_none());
    }
}
