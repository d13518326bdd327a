//! Price feeds.
//!
//! Every feed is refreshed by `update()`, the only operation that mutates it.
//! Reads are synchronous and return `None` when no price is available, either
//! because `update()` has not succeeded yet or the requested time is outside
//! the data the feed holds.
//!
//! The set of feed types is closed:
//! - [`ExchangePriceFeed`]: exchange OHLC candles plus spot price
//! - [`AmmPriceFeed`]: TWAP of an AMM pair's reserve ratio
//! - [`MedianPriceFeed`]: median (or mean) of nested feeds

mod amm;
mod exchange;
mod factory;
mod median;
mod twap;

pub use amm::{AmmFeedParams, AmmPriceFeed};
pub use exchange::{ExchangeFeedParams, ExchangePriceFeed};
pub use factory::{
    amm_feed_config, create_price_feed, default_reference_feed, reference_feed_config,
    resolve_price_feed_config, FeedContext, PriceFeedConfig, ReserveSourceBuilder,
};
pub use median::{mean, median, MedianPriceFeed};
pub use twap::compute_twap;

use futures::future::BoxFuture;
use risk_agent_api::NetworkError;
use risk_agent_chain::LedgerError;

use crate::fixed_point::FixedPoint;

/// Failure of a feed update. The feed keeps its previous data.
#[derive(Debug, thiserror::Error)]
pub enum PriceFeedError {
    #[error("price request failed: {0}")]
    Network(#[from] NetworkError),

    #[error("reserve query failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid price from {source_name}: {reason}")]
    InvalidPrice { source_name: String, reason: String },
}

/// A price feed of any supported type.
#[derive(Debug)]
pub enum PriceFeed {
    Exchange(ExchangePriceFeed),
    Amm(AmmPriceFeed),
    Median(MedianPriceFeed),
}

impl PriceFeed {
    /// Refresh the feed's data.
    pub fn update(&self) -> BoxFuture<'_, Result<(), PriceFeedError>> {
        match self {
            Self::Exchange(feed) => Box::pin(feed.update()),
            Self::Amm(feed) => Box::pin(feed.update()),
            Self::Median(feed) => Box::pin(feed.update()),
        }
    }

    pub fn current_price(&self) -> Option<FixedPoint> {
        match self {
            Self::Exchange(feed) => feed.current_price(),
            Self::Amm(feed) => feed.current_price(),
            Self::Median(feed) => feed.current_price(),
        }
    }

    /// Price at unix time `time`.
    pub fn historical_price(&self, time: u64) -> Option<FixedPoint> {
        match self {
            Self::Exchange(feed) => feed.historical_price(time),
            Self::Amm(feed) => feed.historical_price(time),
            Self::Median(feed) => feed.historical_price(time),
        }
    }

    /// Time of the last successful update, by the feed's clock.
    pub fn last_update_time(&self) -> Option<u64> {
        match self {
            Self::Exchange(feed) => feed.last_update_time(),
            Self::Amm(feed) => feed.last_update_time(),
            Self::Median(feed) => feed.last_update_time(),
        }
    }

    /// Seconds of history available behind `last_update_time`.
    pub fn lookback(&self) -> u64 {
        match self {
            Self::Exchange(feed) => feed.lookback(),
            Self::Amm(feed) => feed.lookback(),
            Self::Median(feed) => feed.lookback(),
        }
    }

    /// Scale of the prices this feed returns.
    pub fn decimals(&self) -> u8 {
        match self {
            Self::Exchange(feed) => feed.decimals(),
            Self::Amm(feed) => feed.decimals(),
            Self::Median(feed) => feed.decimals(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exchange(_) => "exchange",
            Self::Amm(_) => "amm",
            Self::Median(_) => "median",
        }
    }
}
