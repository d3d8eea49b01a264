use async_trait::async_trait;
use bittrex_core::{
    validate_symbol, OrderBookDepth, OrderBookEntry, OrderBookSnapshot, RestError,
    SnapshotProvider,
};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::config::RestClientOptions;

/// Response header carrying the order book sequence number.
pub const SEQUENCE_HEADER: &str = "sequence";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireLevel {
    quantity: Decimal,
    rate: Decimal,
}

#[derive(Debug, Deserialize)]
struct WireOrderBook {
    #[serde(default)]
    bid: Vec<WireLevel>,
    #[serde(default)]
    ask: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePing {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BittrexRestClient {
    http: reqwest::Client,
    options: RestClientOptions,
}

impl BittrexRestClient {
    pub fn new(options: RestClientOptions) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout())
            .build()
            .map_err(|e| RestError::Http(e.to_string()))?;
        Ok(Self { http, options })
    }

    pub fn options(&self) -> &RestClientOptions {
        &self.options
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v3/{}", self.options.base_url.trim_end_matches('/'), path)
    }

    /// Connectivity check. Returns the exchange's clock.
    pub async fn ping(&self) -> Result<DateTime<Utc>, RestError> {
        let response = self
            .http
            .get(self.url("ping"))
            .send()
            .await
            .map_err(|e| RestError::Http(e.to_string()))?;
        let body = read_body(response).await?.1;
        let ping: WirePing =
            serde_json::from_str(&body).map_err(|e| RestError::Decode(e.to_string()))?;
        DateTime::from_timestamp_millis(ping.server_time)
            .ok_or_else(|| RestError::Decode(format!("server time out of range: {}", ping.server_time)))
    }

    /// Fetch a full order book snapshot. The symbol is validated before any
    /// request is made.
    pub async fn get_order_book(
        &self,
        symbol: &str,
        depth: OrderBookDepth,
    ) -> Result<OrderBookSnapshot, RestError> {
        validate_symbol(symbol)?;

        let response = self
            .http
            .get(self.url(&format!("markets/{}/orderbook", symbol)))
            .query(&[("depth", depth.levels())])
            .send()
            .await
            .map_err(|e| RestError::Http(e.to_string()))?;
        let (headers, body) = read_body(response).await?;
        let sequence = parse_sequence(&headers)?;
        let snapshot = parse_order_book(symbol, sequence, &body)?;

        debug!(
            symbol,
            sequence,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Fetched order book snapshot"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl SnapshotProvider for BittrexRestClient {
    async fn order_book_snapshot(
        &self,
        symbol: &str,
        depth: OrderBookDepth,
    ) -> Result<OrderBookSnapshot, RestError> {
        self.get_order_book(symbol, depth).await
    }
}

/// Split a response into headers and body text, mapping non-2xx statuses to
/// [`RestError::Status`] with the exchange's error code when present.
async fn read_body(response: reqwest::Response) -> Result<(HeaderMap, String), RestError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(RestError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    Ok((headers, body))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<WireError>(body)
        .map(|e| e.code)
        .unwrap_or_else(|_| body.to_string())
}

fn parse_sequence(headers: &HeaderMap) -> Result<i64, RestError> {
    let value = headers
        .get(SEQUENCE_HEADER)
        .ok_or(RestError::MissingSequence)?;
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| RestError::Decode(format!("invalid sequence header: {:?}", value)))
}

fn parse_order_book(symbol: &str, sequence: i64, body: &str) -> Result<OrderBookSnapshot, RestError> {
    let book: WireOrderBook =
        serde_json::from_str(body).map_err(|e| RestError::Decode(e.to_string()))?;
    let convert = |levels: Vec<WireLevel>| -> Vec<OrderBookEntry> {
        levels
            .into_iter()
            .map(|l| OrderBookEntry::new(l.rate, l.quantity))
            .collect()
    };
    Ok(OrderBookSnapshot {
        symbol: symbol.to_string(),
        sequence,
        bids: convert(book.bid),
        asks: convert(book.ask),
    })
}
