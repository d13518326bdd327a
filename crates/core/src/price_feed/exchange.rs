//! Exchange OHLC price feed.

use parking_lot::RwLock;
use risk_agent_api::{CryptoWatchClient, OhlcPeriod};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::PriceFeedError;
use crate::clock::Clock;
use crate::fixed_point::FixedPoint;

/// Settings for [`ExchangePriceFeed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeFeedParams {
    /// Seconds of history kept for historical lookups
    pub lookback: u64,
    /// Candle length in seconds
    pub ohlc_period: u64,
    pub min_time_between_updates: u64,
    pub invert_price: bool,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
struct PricePeriod {
    open_time: u64,
    close_time: u64,
    open_price: Option<FixedPoint>,
}

#[derive(Debug, Default)]
struct ExchangeState {
    periods: Vec<PricePeriod>,
    current_price: Option<FixedPoint>,
    last_update_time: Option<u64>,
}

/// Spot and historical prices from one exchange market's candles.
#[derive(Debug)]
pub struct ExchangePriceFeed {
    client: CryptoWatchClient,
    clock: Arc<dyn Clock>,
    params: ExchangeFeedParams,
    state: RwLock<ExchangeState>,
}

impl ExchangePriceFeed {
    pub fn new(client: CryptoWatchClient, clock: Arc<dyn Clock>, params: ExchangeFeedParams) -> Self {
        Self {
            client,
            clock,
            params,
            state: RwLock::new(ExchangeState::default()),
        }
    }

    pub fn lookback(&self) -> u64 {
        self.params.lookback
    }

    pub fn decimals(&self) -> u8 {
        self.params.decimals
    }

    pub fn market(&self) -> String {
        self.client.market()
    }

    /// Refresh candles and spot price. Throttled by `min_time_between_updates`;
    /// on failure the previous data is kept.
    #[instrument(skip(self), fields(market = %self.client.market()))]
    pub async fn update(&self) -> Result<(), PriceFeedError> {
        let now = self.clock.now();
        if let Some(last) = self.state.read().last_update_time {
            if last + self.params.min_time_between_updates > now {
                debug!(
                    at = "ExchangePriceFeed",
                    last_update_time = last,
                    now,
                    "Update skipped, too soon since last update"
                );
                return Ok(());
            }
        }

        let period = self.params.ohlc_period.max(1);
        let earliest = now.saturating_sub(self.params.lookback) / period * period;

        let (candles, spot) = tokio::try_join!(
            self.client.fetch_ohlc(earliest, now, period),
            self.client.fetch_price()
        )?;

        let periods = candles
            .iter()
            .map(|candle| self.convert_period(candle))
            .collect::<Result<Vec<_>, _>>()?;
        let current_price = self.convert(&spot)?;

        debug!(
            at = "ExchangePriceFeed",
            periods = periods.len(),
            current_price = %current_price.map(|p| p.to_string()).unwrap_or_default(),
            "Price feed updated"
        );

        let mut state = self.state.write();
        state.periods = periods;
        state.current_price = current_price;
        state.last_update_time = Some(now);
        Ok(())
    }

    pub fn current_price(&self) -> Option<FixedPoint> {
        self.state.read().current_price
    }

    /// Open price of the first candle closing after `time`; the spot price
    /// when `time` is past every candle.
    pub fn historical_price(&self, time: u64) -> Option<FixedPoint> {
        let state = self.state.read();
        let first = state.periods.first()?;
        if time < first.open_time {
            return None;
        }
        match state.periods.iter().find(|period| period.close_time > time) {
            Some(period) => period.open_price,
            None => state.current_price,
        }
    }

    pub fn last_update_time(&self) -> Option<u64> {
        self.state.read().last_update_time
    }

    fn convert_period(&self, candle: &OhlcPeriod) -> Result<PricePeriod, PriceFeedError> {
        Ok(PricePeriod {
            open_time: candle.open_time,
            close_time: candle.close_time,
            open_price: self.convert(&candle.open_price)?,
        })
    }

    /// Decimal text to a feed price; inverting a zero price yields `None`.
    fn convert(&self, text: &str) -> Result<Option<FixedPoint>, PriceFeedError> {
        let price = FixedPoint::parse(text, self.params.decimals).map_err(|e| {
            PriceFeedError::InvalidPrice {
                source_name: self.client.market(),
                reason: e.to_string(),
            }
        })?;
        if !self.params.invert_price {
            return Ok(Some(price));
        }
        Ok(FixedPoint::one(self.params.decimals).div(&price))
    }
}
