//! REST side of the Bittrex v3 API. Only the calls the order book
//! synchronizer needs are implemented.

pub mod client;
pub mod config;

pub use client::BittrexRestClient;
pub use config::RestClientOptions;
