//! Median (or mean) across constituent feeds.

use alloy::primitives::U256;
use futures::future::join_all;

use super::{PriceFeed, PriceFeedError};
use crate::config::ConfigError;
use crate::fixed_point::FixedPoint;

/// Aggregates one or more feeds. Any unavailable constituent makes the
/// aggregate unavailable.
#[derive(Debug)]
pub struct MedianPriceFeed {
    feeds: Vec<PriceFeed>,
    compute_mean: bool,
    decimals: u8,
}

impl MedianPriceFeed {
    pub fn new(feeds: Vec<PriceFeed>, compute_mean: bool) -> Result<Self, ConfigError> {
        let Some(decimals) = feeds.iter().map(PriceFeed::decimals).max() else {
            return Err(ConfigError::EmptyMedianizer);
        };
        Ok(Self {
            feeds,
            compute_mean,
            decimals,
        })
    }

    pub fn feeds(&self) -> &[PriceFeed] {
        &self.feeds
    }

    /// Shortest constituent lookback.
    pub fn lookback(&self) -> u64 {
        self.feeds.iter().map(PriceFeed::lookback).min().unwrap_or(0)
    }

    /// Largest constituent scale; constituent prices are rescaled to it.
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Update every constituent, reporting the first failure after all ran.
    pub async fn update(&self) -> Result<(), PriceFeedError> {
        let results = join_all(self.feeds.iter().map(PriceFeed::update)).await;
        results.into_iter().collect()
    }

    pub fn current_price(&self) -> Option<FixedPoint> {
        let prices = self
            .feeds
            .iter()
            .map(PriceFeed::current_price)
            .collect::<Option<Vec<_>>>()?;
        self.aggregate(prices)
    }

    pub fn historical_price(&self, time: u64) -> Option<FixedPoint> {
        let prices = self
            .feeds
            .iter()
            .map(|feed| feed.historical_price(time))
            .collect::<Option<Vec<_>>>()?;
        self.aggregate(prices)
    }

    /// Most recent constituent update.
    pub fn last_update_time(&self) -> Option<u64> {
        self.feeds
            .iter()
            .map(PriceFeed::last_update_time)
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .max()
    }

    fn aggregate(&self, prices: Vec<FixedPoint>) -> Option<FixedPoint> {
        let prices: Vec<FixedPoint> = prices.iter().map(|p| p.rescale(self.decimals)).collect();
        if self.compute_mean {
            mean(&prices)
        } else {
            median(prices)
        }
    }
}

/// Middle value, or the average of the two middle values for an even count.
pub fn median(mut prices: Vec<FixedPoint>) -> Option<FixedPoint> {
    if prices.is_empty() {
        return None;
    }
    prices.sort();
    let mid = prices.len() / 2;
    if prices.len() % 2 == 1 {
        return Some(prices[mid]);
    }
    let sum = prices[mid - 1].checked_add(&prices[mid])?;
    Some(FixedPoint::from_raw(sum.raw() / U256::from(2u64), sum.decimals()))
}

/// Arithmetic mean at the first value's scale.
pub fn mean(prices: &[FixedPoint]) -> Option<FixedPoint> {
    let first = prices.first()?;
    let sum = prices[1..]
        .iter()
        .try_fold(*first, |acc, price| acc.checked_add(price))?;
    Some(FixedPoint::from_raw(
        sum.raw() / U256::from(prices.len()),
        sum.decimals(),
    ))
}
