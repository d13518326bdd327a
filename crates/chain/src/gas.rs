//! Gas price estimation for transaction submission.
//!
//! The estimator caches a "fast" gas price and refreshes it at most once per
//! `min_update_interval`. A failed refresh keeps the previous value.

use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::ledger::LedgerError;

/// Source of the gas price used for submissions.
#[async_trait]
pub trait GasEstimator: Send + Sync + Debug {
    /// Refresh the cached price unless it was refreshed recently.
    async fn update(&self);

    /// Cached fast gas price in wei.
    fn fast_price(&self) -> u128;
}

#[derive(Debug)]
struct GasState {
    price: u128,
    last_update: Option<Instant>,
}

/// Gas estimator backed by the node's `eth_gasPrice`.
///
/// The node price is scaled by `multiplier` and clamped to `[floor, cap]`.
#[derive(Debug)]
pub struct RpcGasEstimator {
    rpc_url: Url,
    multiplier: f64,
    floor: u128,
    cap: u128,
    min_update_interval: Duration,
    state: Mutex<GasState>,
}

/// Fallback price before the first successful update: 50 gwei.
pub const DEFAULT_GAS_PRICE: u128 = 50_000_000_000;

impl RpcGasEstimator {
    /// Create an estimator with the default 50 gwei starting price.
    pub fn new(rpc_url: &str) -> Result<Self, LedgerError> {
        let rpc_url: Url = rpc_url
            .parse()
            .map_err(|e| LedgerError::Config(format!("invalid RPC URL {}: {}", rpc_url, e)))?;

        Ok(Self {
            rpc_url,
            multiplier: 1.0,
            floor: 1_000_000_000,
            cap: 1_000_000_000_000,
            min_update_interval: Duration::from_secs(60),
            state: Mutex::new(GasState {
                price: DEFAULT_GAS_PRICE,
                last_update: None,
            }),
        })
    }

    /// Scale the node price, e.g. 1.2 to bid 20% over it.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Clamp prices to `[floor, cap]` wei.
    pub fn with_bounds(mut self, floor: u128, cap: u128) -> Self {
        self.floor = floor;
        self.cap = cap.max(floor);
        self
    }

    pub fn with_min_update_interval(mut self, interval: Duration) -> Self {
        self.min_update_interval = interval;
        self
    }

    /// Whether enough time has passed since the last successful refresh.
    fn is_due(&self) -> bool {
        match self.state.lock().last_update {
            Some(at) => at.elapsed() >= self.min_update_interval,
            None => true,
        }
    }

    /// Apply multiplier and bounds to a node quote and cache it.
    fn record_quote(&self, node_price: u128) -> u128 {
        let scaled = (node_price as f64 * self.multiplier) as u128;
        let price = scaled.clamp(self.floor, self.cap);

        let mut state = self.state.lock();
        state.price = price;
        state.last_update = Some(Instant::now());
        price
    }
}

#[async_trait]
impl GasEstimator for RpcGasEstimator {
    async fn update(&self) {
        if !self.is_due() {
            return;
        }

        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        match provider.get_gas_price().await {
            Ok(node_price) => {
                let price = self.record_quote(node_price);
                debug!(
                    at = "GasEstimator",
                    node_price_gwei = node_price / 1_000_000_000,
                    gas_price_gwei = price / 1_000_000_000,
                    "Gas price updated"
                );
            }
            Err(e) => {
                warn!(
                    at = "GasEstimator",
                    error = %e,
                    gas_price_gwei = self.fast_price() / 1_000_000_000,
                    "Failed to fetch gas price, keeping previous value"
                );
            }
        }
    }

    fn fast_price(&self) -> u128 {
        self.state.lock().price
    }
}
