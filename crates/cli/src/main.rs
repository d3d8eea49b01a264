mod config;

use anyhow::Result;
use bittrex_core::{Channel, DataEvent, OrderBookDepth};
use bittrex_orderbook::{OrderBookSynchronizer, SyncStatus};
use bittrex_rest::BittrexRestClient;
use bittrex_stream::{codec, BittrexSocketClient};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "bittrex")]
#[command(about = "Bittrex v3 streaming client: subscribe to channels, keep local order books")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key for private channels
    #[arg(long, env = "BITTREX_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API secret for private channels
    #[arg(long, env = "BITTREX_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to channels and print every update as JSON
    Stream {
        /// Channel names (e.g. "ticker_BTC-USD", "orderbook_ETH-USD_25", "heartbeat")
        #[arg(required = true)]
        channels: Vec<String>,
    },

    /// Keep a local order book in sync and print the top of book
    Book {
        /// Market symbol (e.g. "BTC-USD")
        symbol: String,

        /// Subscription depth (1, 25 or 500)
        #[arg(short, long, default_value = "25")]
        depth: u32,

        /// Levels per side to print
        #[arg(long, default_value = "5")]
        levels: usize,

        /// Seconds between prints
        #[arg(long, default_value = "2")]
        interval: u64,
    },

    /// Decode a base64 deflate payload as found in hub envelopes
    Decode {
        payload: String,
    },

    /// Check REST connectivity
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    config.apply_credentials(cli.api_key, cli.api_secret);

    match cli.command {
        Commands::Stream { channels } => stream(config, channels).await?,
        Commands::Book {
            symbol,
            depth,
            levels,
            interval,
        } => book(config, symbol, depth, levels, interval).await?,
        Commands::Decode { payload } => match codec::decode(&payload) {
            Some(json) => println!("{json}"),
            None => anyhow::bail!("Payload is empty or not valid base64 deflate data"),
        },
        Commands::Ping => {
            let rest = BittrexRestClient::new(config.rest)?;
            let server_time = rest.ping().await?;
            println!("Server time: {}", server_time.to_rfc3339());
        }
    }

    Ok(())
}

async fn stream(config: CliConfig, names: Vec<String>) -> Result<()> {
    let channels = names
        .iter()
        .map(|name| name.parse::<Channel>())
        .collect::<Result<Vec<_>, _>>()?;

    let client = BittrexSocketClient::new(config.socket);
    let mut handles = Vec::new();

    // Heartbeats carry no payload and get their own subscription.
    let (heartbeat, data): (Vec<Channel>, Vec<Channel>) = channels
        .into_iter()
        .partition(|channel| *channel == Channel::Heartbeat);
    if !heartbeat.is_empty() {
        handles.push(
            client
                .subscribe_heartbeat(|event| {
                    println!("{} heartbeat", event.data.timestamp.to_rfc3339());
                })
                .await?,
        );
    }
    if !data.is_empty() {
        handles.push(
            client
                .subscribe(data, |event: DataEvent<serde_json::Value>| {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!(error = %e, "Failed to print update"),
                    }
                })
                .await?,
        );
    }

    tracing::info!(subscriptions = handles.len(), "Streaming, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    client.close().await;
    Ok(())
}

async fn book(
    config: CliConfig,
    symbol: String,
    depth: u32,
    levels: usize,
    interval: u64,
) -> Result<()> {
    let depth = OrderBookDepth::try_from(depth).map_err(|e| anyhow::anyhow!(e))?;

    let rest = Arc::new(BittrexRestClient::new(config.rest)?);
    let socket = Arc::new(BittrexSocketClient::new(config.socket));
    let synchronizer = Arc::new(OrderBookSynchronizer::new(rest, socket.clone(), config.sync));

    synchronizer.start(&symbol, depth).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => print_book(&synchronizer, levels).await,
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    synchronizer.stop().await;
    socket.close().await;
    Ok(())
}

async fn print_book(synchronizer: &OrderBookSynchronizer, levels: usize) {
    let status = synchronizer.status();
    let Some(book) = synchronizer.book().await else {
        println!("{status:?}: waiting for snapshot");
        return;
    };

    let sep = "=".repeat(44);
    println!("\n{sep}");
    println!("  {}  seq {}  {:?}", book.symbol(), book.sequence(), status);
    if let Some(spread) = book.spread() {
        println!("  spread {}", spread);
    }
    println!("{sep}");
    for ask in book.asks().iter().take(levels).rev() {
        println!("  ask  {:>16}  {:>16}", ask.rate, ask.quantity);
    }
    println!("  {}", "-".repeat(40));
    for bid in book.bids().iter().take(levels) {
        println!("  bid  {:>16}  {:>16}", bid.rate, bid.quantity);
    }
    if status != SyncStatus::Synced {
        println!("  (book may be stale)");
        if let Some(error) = synchronizer.last_error() {
            println!("  last error: {error}");
        }
    }
}
