//! Streaming channel grammar.
//!
//! Channel names are what the exchange expects in subscribe requests
//! (`ticker_BTC-USD`, `candle_ETH-BTC_MINUTE_5`, ...). They are parsed once
//! into [`Channel`] so that inbound messages can be routed by comparing
//! variants instead of slicing strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{validate_symbol, CandleInterval, OrderBookDepth};
use crate::traits::ChannelParseError;

/// The family a channel belongs to, independent of its symbol/interval
/// parameters. Inbound hub methods map onto exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Heartbeat,
    MarketSummaries,
    MarketSummary,
    Tickers,
    Ticker,
    Trade,
    OrderBook,
    Candle,
    Order,
    Balance,
    Execution,
    Deposit,
    ConditionalOrder,
}

impl ChannelKind {
    /// Resolve a normalised (snake_case) hub method name.
    pub fn from_method(normalized: &str) -> Option<Self> {
        let kind = match normalized {
            "heartbeat" => ChannelKind::Heartbeat,
            "market_summaries" => ChannelKind::MarketSummaries,
            "market_summary" => ChannelKind::MarketSummary,
            "tickers" => ChannelKind::Tickers,
            "ticker" => ChannelKind::Ticker,
            "trade" => ChannelKind::Trade,
            "order_book" => ChannelKind::OrderBook,
            "candle" => ChannelKind::Candle,
            "order" => ChannelKind::Order,
            "balance" => ChannelKind::Balance,
            "execution" => ChannelKind::Execution,
            "deposit" => ChannelKind::Deposit,
            "conditional_order" => ChannelKind::ConditionalOrder,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether messages of this kind are scoped to a single market.
    pub fn is_symbol_scoped(&self) -> bool {
        matches!(
            self,
            ChannelKind::MarketSummary
                | ChannelKind::Ticker
                | ChannelKind::Trade
                | ChannelKind::OrderBook
                | ChannelKind::Candle
        )
    }

    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            ChannelKind::Order
                | ChannelKind::Balance
                | ChannelKind::Execution
                | ChannelKind::Deposit
                | ChannelKind::ConditionalOrder
        )
    }
}

/// A subscribable streaming channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Heartbeat,
    MarketSummaries,
    MarketSummary(String),
    Tickers,
    Ticker(String),
    Trade(String),
    OrderBook {
        symbol: String,
        depth: OrderBookDepth,
    },
    Candle {
        symbol: String,
        interval: CandleInterval,
    },
    Order,
    Balance,
    Execution,
    Deposit,
    ConditionalOrder,
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Heartbeat => ChannelKind::Heartbeat,
            Channel::MarketSummaries => ChannelKind::MarketSummaries,
            Channel::MarketSummary(_) => ChannelKind::MarketSummary,
            Channel::Tickers => ChannelKind::Tickers,
            Channel::Ticker(_) => ChannelKind::Ticker,
            Channel::Trade(_) => ChannelKind::Trade,
            Channel::OrderBook { .. } => ChannelKind::OrderBook,
            Channel::Candle { .. } => ChannelKind::Candle,
            Channel::Order => ChannelKind::Order,
            Channel::Balance => ChannelKind::Balance,
            Channel::Execution => ChannelKind::Execution,
            Channel::Deposit => ChannelKind::Deposit,
            Channel::ConditionalOrder => ChannelKind::ConditionalOrder,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            Channel::MarketSummary(symbol) | Channel::Ticker(symbol) | Channel::Trade(symbol) => {
                Some(symbol)
            }
            Channel::OrderBook { symbol, .. } | Channel::Candle { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.kind().requires_auth()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Heartbeat => f.write_str("heartbeat"),
            Channel::MarketSummaries => f.write_str("market_summaries"),
            Channel::MarketSummary(symbol) => write!(f, "market_summary_{}", symbol),
            Channel::Tickers => f.write_str("tickers"),
            Channel::Ticker(symbol) => write!(f, "ticker_{}", symbol),
            Channel::Trade(symbol) => write!(f, "trade_{}", symbol),
            Channel::OrderBook { symbol, depth } => write!(f, "orderbook_{}_{}", symbol, depth),
            Channel::Candle { symbol, interval } => write!(f, "candle_{}_{}", symbol, interval),
            Channel::Order => f.write_str("order"),
            Channel::Balance => f.write_str("balance"),
            Channel::Execution => f.write_str("execution"),
            Channel::Deposit => f.write_str("deposit"),
            Channel::ConditionalOrder => f.write_str("conditional_order"),
        }
    }
}

impl FromStr for Channel {
    type Err = ChannelParseError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let global = match name {
            "heartbeat" => Some(Channel::Heartbeat),
            "market_summaries" => Some(Channel::MarketSummaries),
            "tickers" => Some(Channel::Tickers),
            "order" => Some(Channel::Order),
            "balance" => Some(Channel::Balance),
            "execution" => Some(Channel::Execution),
            "deposit" => Some(Channel::Deposit),
            "conditional_order" => Some(Channel::ConditionalOrder),
            _ => None,
        };
        if let Some(channel) = global {
            return Ok(channel);
        }

        // Symbols never contain underscores, so everything after the first
        // underscore following the prefix is the channel parameter.
        if let Some(symbol) = name.strip_prefix("market_summary_") {
            return Ok(Channel::MarketSummary(checked_symbol(name, symbol)?));
        }
        if let Some(symbol) = name.strip_prefix("ticker_") {
            return Ok(Channel::Ticker(checked_symbol(name, symbol)?));
        }
        if let Some(symbol) = name.strip_prefix("trade_") {
            return Ok(Channel::Trade(checked_symbol(name, symbol)?));
        }
        if let Some(rest) = name.strip_prefix("orderbook_") {
            let (symbol, depth) = split_parameter(name, rest)?;
            let depth = depth
                .parse::<u32>()
                .map_err(|_| ChannelParseError::InvalidParameter(name.to_string()))
                .and_then(|levels| {
                    OrderBookDepth::try_from(levels)
                        .map_err(|_| ChannelParseError::InvalidParameter(name.to_string()))
                })?;
            return Ok(Channel::OrderBook {
                symbol: checked_symbol(name, symbol)?,
                depth,
            });
        }
        if let Some(rest) = name.strip_prefix("candle_") {
            let (symbol, interval) = split_parameter(name, rest)?;
            let interval = interval
                .parse::<CandleInterval>()
                .map_err(|_| ChannelParseError::InvalidParameter(name.to_string()))?;
            return Ok(Channel::Candle {
                symbol: checked_symbol(name, symbol)?,
                interval,
            });
        }

        Err(ChannelParseError::UnknownChannel(name.to_string()))
    }
}

fn split_parameter<'a>(name: &str, rest: &'a str) -> Result<(&'a str, &'a str), ChannelParseError> {
    rest.split_once('_')
        .ok_or_else(|| ChannelParseError::InvalidParameter(name.to_string()))
}

fn checked_symbol(name: &str, symbol: &str) -> Result<String, ChannelParseError> {
    validate_symbol(symbol).map_err(|source| ChannelParseError::InvalidSymbol {
        channel: name.to_string(),
        source,
    })?;
    Ok(symbol.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_round_trip() {
        let names = [
            "heartbeat",
            "market_summaries",
            "market_summary_BTC-USD",
            "tickers",
            "ticker_ETH-BTC",
            "trade_BTC-USDT",
            "orderbook_BTC-USD_25",
            "candle_BTC-USD_MINUTE_1",
            "order",
            "balance",
            "execution",
            "deposit",
            "conditional_order",
        ];
        for name in names {
            let channel: Channel = name.parse().unwrap();
            assert_eq!(channel.to_string(), name);
        }
    }

    #[test]
    fn test_candle_channel_carries_interval() {
        let channel: Channel = "candle_BTC-USD_HOUR_1".parse().unwrap();
        assert_eq!(
            channel,
            Channel::Candle {
                symbol: "BTC-USD".to_string(),
                interval: CandleInterval::OneHour,
            }
        );
        assert_eq!(channel.symbol(), Some("BTC-USD"));
    }

    #[test]
    fn test_invalid_channels_rejected() {
        assert!(matches!(
            "orderbook_BTC-USD_10".parse::<Channel>(),
            Err(ChannelParseError::InvalidParameter(_))
        ));
        assert!(matches!(
            "ticker_BTCUSD".parse::<Channel>(),
            Err(ChannelParseError::InvalidSymbol { .. })
        ));
        assert!(matches!(
            "candles_BTC-USD_MINUTE_1".parse::<Channel>(),
            Err(ChannelParseError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_method_kinds() {
        assert_eq!(ChannelKind::from_method("order_book"), Some(ChannelKind::OrderBook));
        assert_eq!(
            ChannelKind::from_method("conditional_order"),
            Some(ChannelKind::ConditionalOrder)
        );
        assert_eq!(ChannelKind::from_method("authentication_expiring"), None);
        assert!(ChannelKind::Balance.requires_auth());
        assert!(!ChannelKind::Ticker.requires_auth());
    }
}
