//! Price-data API clients for external services.
//!
//! This crate provides:
//! - `Networker`: the "fetch JSON from a URL" capability used by price feeds
//! - CryptoWatch: exchange OHLC candles and spot prices

mod cryptowatch;
mod networker;

pub use cryptowatch::{
    parse_ohlc, parse_price, CryptoWatchClient, OhlcPeriod, API_KEY_HEADER, CRYPTOWATCH_BASE_URL,
};
pub use networker::{HttpNetworker, NetworkError, Networker};
