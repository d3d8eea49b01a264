//! Local order books seeded from REST snapshots and kept current from the
//! `orderbook_{SYMBOL}_{DEPTH}` stream.

pub mod book;
pub mod config;
pub mod error;
pub mod feed;
pub mod sync;

pub use book::{DeltaOutcome, LocalOrderBook};
pub use config::SyncOptions;
pub use error::SyncError;
pub use feed::DeltaFeed;
pub use sync::{OrderBookSynchronizer, SyncStatus};
