//! AMM time-weighted average price feed.

use alloy::primitives::U256;
use parking_lot::RwLock;
use risk_agent_chain::{ReserveSample, ReserveSource};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::twap::compute_twap;
use super::PriceFeedError;
use crate::clock::Clock;
use crate::fixed_point::FixedPoint;

/// Settings for [`AmmPriceFeed`].
#[derive(Debug, Clone, PartialEq)]
pub struct AmmFeedParams {
    /// Length of the averaging window in seconds
    pub twap_length: u64,
    /// Seconds of history kept for historical lookups
    pub lookback: u64,
    pub invert_price: bool,
    pub decimals: u8,
}

#[derive(Debug, Default)]
struct AmmState {
    /// `(timestamp, price)` at feed decimals, oldest first
    prices: Vec<(u64, U256)>,
    current_price: Option<FixedPoint>,
    last_update_time: Option<u64>,
}

/// TWAP of a constant-product pair's reserve ratio.
#[derive(Debug)]
pub struct AmmPriceFeed {
    source: Arc<dyn ReserveSource>,
    clock: Arc<dyn Clock>,
    params: AmmFeedParams,
    state: RwLock<AmmState>,
}

impl AmmPriceFeed {
    pub fn new(source: Arc<dyn ReserveSource>, clock: Arc<dyn Clock>, params: AmmFeedParams) -> Self {
        Self {
            source,
            clock,
            params,
            state: RwLock::new(AmmState::default()),
        }
    }

    pub fn lookback(&self) -> u64 {
        self.params.lookback
    }

    pub fn decimals(&self) -> u8 {
        self.params.decimals
    }

    /// Reload reserve history covering `twap_length + lookback` seconds.
    #[instrument(skip(self))]
    pub async fn update(&self) -> Result<(), PriceFeedError> {
        let now = self.clock.now();
        let earliest = now.saturating_sub(self.params.twap_length + self.params.lookback);

        let decimals = self.source.token_decimals().await?;
        let samples = self.source.samples_since(earliest).await?;

        let prices: Vec<(u64, U256)> = samples
            .iter()
            .filter_map(|sample| {
                self.sample_price(sample, decimals)
                    .map(|price| (sample.timestamp, price.raw()))
            })
            .collect();

        let mut state = self.state.write();
        if prices.is_empty() {
            debug!(
                at = "AmmPriceFeed",
                samples = samples.len(),
                "No usable reserve samples in window"
            );
            state.prices.clear();
            state.current_price = None;
            return Ok(());
        }

        let current_price = compute_twap(&prices, now.saturating_sub(self.params.twap_length), now)
            .map(|raw| FixedPoint::from_raw(raw, self.params.decimals));
        debug!(
            at = "AmmPriceFeed",
            samples = prices.len(),
            current_price = %current_price.map(|p| p.to_string()).unwrap_or_default(),
            "Price feed updated"
        );

        state.prices = prices;
        state.current_price = current_price;
        state.last_update_time = Some(now);
        Ok(())
    }

    pub fn current_price(&self) -> Option<FixedPoint> {
        self.state.read().current_price
    }

    /// TWAP over `[time - twap_length, time]`, unavailable beyond the lookback.
    pub fn historical_price(&self, time: u64) -> Option<FixedPoint> {
        let state = self.state.read();
        let last_update = state.last_update_time?;
        if time < last_update.saturating_sub(self.params.lookback) {
            return None;
        }
        compute_twap(&state.prices, time.saturating_sub(self.params.twap_length), time)
            .map(|raw| FixedPoint::from_raw(raw, self.params.decimals))
    }

    pub fn last_update_time(&self) -> Option<u64> {
        self.state.read().last_update_time
    }

    /// Reserve ratio at feed decimals: token1 per token0, or token0 per token1
    /// when inverted. `None` when either reserve is empty.
    fn sample_price(&self, sample: &ReserveSample, (decimals0, decimals1): (u8, u8)) -> Option<FixedPoint> {
        if sample.reserve0.is_zero() || sample.reserve1.is_zero() {
            return None;
        }
        let reserve0 = FixedPoint::from_raw(sample.reserve0, decimals0);
        let reserve1 = FixedPoint::from_raw(sample.reserve1, decimals1);
        let (quote, base) = if self.params.invert_price {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };
        quote.rescale(self.params.decimals).div(&base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::MockReserveSource;

    fn params() -> AmmFeedParams {
        AmmFeedParams {
            twap_length: 100,
            lookback: 1000,
            invert_price: false,
            decimals: 18,
        }
    }

    fn sample(timestamp: u64, reserve0: u64, reserve1: u64) -> ReserveSample {
        ReserveSample {
            timestamp,
            block_number: timestamp,
            log_index: 0,
            reserve0: U256::from(reserve0) * U256::from(10u64).pow(U256::from(18u64)),
            reserve1: U256::from(reserve1) * U256::from(10u64).pow(U256::from(18u64)),
        }
    }

    fn fp(text: &str) -> FixedPoint {
        FixedPoint::parse(text, 18).unwrap()
    }

    fn feed(samples: Vec<ReserveSample>, params: AmmFeedParams) -> (Arc<MockReserveSource>, AmmPriceFeed) {
        let source = Arc::new(MockReserveSource::new((18, 18), samples));
        let clock = Arc::new(ManualClock::new(5000));
        let feed = AmmPriceFeed::new(source.clone(), clock, params);
        (source, feed)
    }

    #[tokio::test]
    async fn test_constant_price_twap() {
        let samples = vec![sample(3000, 10, 20), sample(4000, 5, 10), sample(4950, 1, 2)];
        let (_, feed) = feed(samples, params());
        feed.update().await.unwrap();

        assert_eq!(feed.current_price(), Some(fp("2")));
        assert_eq!(feed.historical_price(4500), Some(fp("2")));
        assert_eq!(feed.last_update_time(), Some(5000));
    }

    #[tokio::test]
    async fn test_twap_weights_by_time() {
        // Price 2 until 4950, then 4: [4900, 5000] averages to 3
        let samples = vec![sample(4000, 1, 2), sample(4950, 1, 4)];
        let (_, feed) = feed(samples, params());
        feed.update().await.unwrap();
        assert_eq!(feed.current_price(), Some(fp("3")));
    }

    #[tokio::test]
    async fn test_inverted_and_mixed_decimals() {
        // 2,000 USDC (6 decimals) per 1 WETH (18 decimals)
        let weth = ReserveSample {
            timestamp: 4000,
            block_number: 1,
            log_index: 0,
            reserve0: U256::from(1_000_000_000_000_000_000u64),
            reserve1: U256::from(2_000_000_000u64),
        };
        let source = Arc::new(MockReserveSource::new((18, 6), vec![weth]));
        let clock = Arc::new(ManualClock::new(5000));

        let feed = AmmPriceFeed::new(source.clone(), clock.clone(), params());
        feed.update().await.unwrap();
        assert_eq!(feed.current_price(), Some(fp("2000")));

        let inverted = AmmPriceFeed::new(
            source,
            clock,
            AmmFeedParams {
                invert_price: true,
                ..params()
            },
        );
        inverted.update().await.unwrap();
        assert_eq!(inverted.current_price(), Some(fp("0.0005")));
    }

    #[tokio::test]
    async fn test_historical_price_outside_lookback() {
        let (_, feed) = feed(vec![sample(3000, 1, 2)], params());
        feed.update().await.unwrap();
        assert_eq!(feed.historical_price(4000), Some(fp("2")));
        assert_eq!(feed.historical_price(3999), None);
    }

    #[tokio::test]
    async fn test_zero_reserves_are_skipped() {
        let samples = vec![sample(3000, 0, 2), sample(4000, 1, 3)];
        let (_, feed) = feed(samples, params());
        feed.update().await.unwrap();
        assert_eq!(feed.current_price(), Some(fp("3")));
    }

    #[tokio::test]
    async fn test_no_samples_keeps_last_update_time() {
        let (source, feed) = feed(vec![sample(3000, 1, 2)], params());
        feed.update().await.unwrap();

        source.set_samples(Vec::new());
        feed.update().await.unwrap();
        assert_eq!(feed.current_price(), None);
        assert_eq!(feed.last_update_time(), Some(5000));
    }

    #[tokio::test]
    async fn test_source_failure_keeps_state() {
        let (source, feed) = feed(vec![sample(3000, 1, 2)], params());
        feed.update().await.unwrap();

        source.fail(true);
        assert!(feed.update().await.is_err());
        assert_eq!(feed.current_price(), Some(fp("2")));
    }
}
