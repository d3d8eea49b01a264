use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::traits::SymbolError;

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Validate a market symbol such as `BTC-USD`.
///
/// A symbol is two non-empty segments joined by a single dash. Segments may
/// contain ASCII letters, digits and dots.
pub fn validate_symbol(symbol: &str) -> Result<(), SymbolError> {
    let (base, quote) = symbol
        .split_once('-')
        .ok_or_else(|| SymbolError::MissingSeparator(symbol.to_string()))?;

    for segment in [base, quote] {
        if segment.is_empty() {
            return Err(SymbolError::EmptySegment(symbol.to_string()));
        }
        if let Some(c) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.'))
        {
            return Err(SymbolError::InvalidCharacter {
                symbol: symbol.to_string(),
                character: c,
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Enum converters
// ---------------------------------------------------------------------------

/// Candle interval as encoded in candle channel names and payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "MINUTE_1")]
    OneMinute,
    #[serde(rename = "MINUTE_5")]
    FiveMinutes,
    #[serde(rename = "HOUR_1")]
    OneHour,
    #[serde(rename = "DAY_1")]
    OneDay,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 4] = [
        CandleInterval::OneMinute,
        CandleInterval::FiveMinutes,
        CandleInterval::OneHour,
        CandleInterval::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "MINUTE_1",
            CandleInterval::FiveMinutes => "MINUTE_5",
            CandleInterval::OneHour => "HOUR_1",
            CandleInterval::OneDay => "DAY_1",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CandleInterval::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| format!("unknown candle interval '{}'", s))
    }
}

/// Number of price levels per side the exchange streams for an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum OrderBookDepth {
    One,
    TwentyFive,
    FiveHundred,
}

impl OrderBookDepth {
    pub fn levels(&self) -> u32 {
        match self {
            OrderBookDepth::One => 1,
            OrderBookDepth::TwentyFive => 25,
            OrderBookDepth::FiveHundred => 500,
        }
    }
}

impl TryFrom<u32> for OrderBookDepth {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OrderBookDepth::One),
            25 => Ok(OrderBookDepth::TwentyFive),
            500 => Ok(OrderBookDepth::FiveHundred),
            other => Err(format!("unsupported order book depth {}", other)),
        }
    }
}

impl From<OrderBookDepth> for u32 {
    fn from(depth: OrderBookDepth) -> Self {
        depth.levels()
    }
}

impl fmt::Display for OrderBookDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.levels())
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    CeilingLimit,
    CeilingMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    GoodTilCancelled,
    ImmediateOrCancel,
    FillOrKill,
    PostOnlyGoodTilCancelled,
    BuyNow,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Pending,
    Completed,
    Orphaned,
    Invalidated,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Heartbeat signal. The exchange sends no payload, so the timestamp is
/// taken locally when the message arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub symbol: String,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    #[serde(default)]
    pub percent_change: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummariesUpdate {
    pub sequence: i64,
    pub deltas: Vec<MarketSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last_trade_rate: Decimal,
    pub bid_rate: Decimal,
    pub ask_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickersUpdate {
    pub sequence: i64,
    pub deltas: Vec<Ticker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub executed_at: DateTime<Utc>,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub taker_side: OrderSide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesUpdate {
    pub market_symbol: String,
    pub sequence: i64,
    pub deltas: Vec<Trade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub starts_at: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleUpdate {
    pub market_symbol: String,
    pub interval: CandleInterval,
    pub sequence: i64,
    pub delta: Candle,
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

/// One price level. A zero quantity in a delta removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub quantity: Decimal,
    pub rate: Decimal,
}

impl OrderBookEntry {
    pub fn new(rate: Decimal, quantity: Decimal) -> Self {
        Self { quantity, rate }
    }
}

/// Incremental order book update as streamed on `orderbook_{SYMBOL}_{DEPTH}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookUpdate {
    pub market_symbol: String,
    pub depth: OrderBookDepth,
    pub sequence: i64,
    #[serde(default)]
    pub bid_deltas: Vec<OrderBookEntry>,
    #[serde(default)]
    pub ask_deltas: Vec<OrderBookEntry>,
}

/// Full order book as returned by the REST snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub sequence: i64,
    pub bids: Vec<OrderBookEntry>,
    pub asks: Vec<OrderBookEntry>,
}

// ---------------------------------------------------------------------------
// Account streams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub currency_symbol: String,
    pub total: Decimal,
    pub available: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    pub account_id: String,
    pub sequence: i64,
    pub delta: Balance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub market_symbol: String,
    pub direction: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub limit: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub fill_quantity: Decimal,
    pub commission: Decimal,
    pub proceeds: Decimal,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub account_id: String,
    pub sequence: i64,
    pub delta: Order,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub market_symbol: String,
    pub executed_at: DateTime<Utc>,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub order_id: String,
    pub commission: Decimal,
    pub is_taker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUpdate {
    pub account_id: String,
    pub sequence: i64,
    pub deltas: Vec<Execution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub id: String,
    pub currency_symbol: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub crypto_address: Option<String>,
    #[serde(default)]
    pub tx_id: Option<String>,
    pub status: DepositStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositUpdate {
    pub account_id: String,
    pub sequence: i64,
    pub delta: Deposit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOrder {
    pub id: String,
    pub market_symbol: String,
    pub operand: String,
    pub trigger_price: Decimal,
    #[serde(default)]
    pub trailing_stop_percent: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOrderUpdate {
    pub account_id: String,
    pub sequence: i64,
    pub delta: ConditionalOrder,
}
