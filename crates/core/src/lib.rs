//! Risk agent core logic.
//!
//! This crate provides the decision side of the agent:
//! - Exact fixed-point arithmetic for collateralization checks
//! - Contract state client with immutable snapshots
//! - Price feeds (exchange OHLC, AMM TWAP, median) built from configuration
//! - Liquidator and disputer engines
//! - The polling loop that drives them
//!
//! Chain access goes through the `Ledger` trait from `risk-agent-chain` and
//! HTTP price data through the `Networker` trait from `risk-agent-api`.

mod agent;
mod client;
pub mod clock;
pub mod config;
mod disputer;
mod events;
mod execution;
pub mod fixed_point;
mod liquidator;
pub mod price_feed;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, CycleReport};
pub use client::{ClientError, ContractClient, Liquidation, Position, Snapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AgentConfig, ConfigError, DisputerConfig, LiquidatorConfig};
pub use disputer::Disputer;
pub use events::ContractEventClient;
pub use execution::{raw_collateral_per_token, ActionSummary};
pub use fixed_point::{is_under_collateralized, FixedPoint, FixedPointError};
pub use liquidator::{liquidation_amount, Liquidator};
pub use price_feed::{
    amm_feed_config, create_price_feed, reference_feed_config, resolve_price_feed_config,
    FeedContext, PriceFeed, PriceFeedConfig, PriceFeedError,
};
