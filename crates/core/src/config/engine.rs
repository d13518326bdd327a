//! Liquidator and disputer parameters.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Gas limits outside this range are rejected.
pub const MIN_TXN_GAS_LIMIT: u64 = 6_000_000;
pub const MAX_TXN_GAS_LIMIT: u64 = 15_000_000;

/// Severity a log override can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn level(&self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

/// Liquidator log severity overrides, per event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidatorLogOverrides {
    /// Severity of the "position liquidated" record (default info)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_liquidated: Option<LogLevel>,

    /// Severity of the "liquidation rewards withdrawn" record (default info)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidation_withdrawn: Option<LogLevel>,
}

/// Liquidation engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidatorConfig {
    /// Safety buffer against feed noise: positions are judged at
    /// `price * (1 - cr_threshold)`. Must satisfy `0 <= x < 1`.
    #[serde(default = "default_cr_threshold")]
    pub cr_threshold: f64,

    /// Seconds after the snapshot time a submitted liquidation stays valid
    #[serde(default = "default_liquidation_deadline")]
    pub liquidation_deadline_secs: u64,

    /// Minimum collateral per token submitted on-chain
    #[serde(default)]
    pub liquidation_min_price: f64,

    /// Gas limit for liquidation and withdrawal transactions
    #[serde(default = "default_txn_gas_limit")]
    pub txn_gas_limit: u64,

    #[serde(default)]
    pub log_overrides: LiquidatorLogOverrides,
}

fn default_cr_threshold() -> f64 {
    0.02
}
fn default_liquidation_deadline() -> u64 {
    300
}
fn default_txn_gas_limit() -> u64 {
    9_000_000
}

impl Default for LiquidatorConfig {
    fn default() -> Self {
        Self {
            cr_threshold: default_cr_threshold(),
            liquidation_deadline_secs: default_liquidation_deadline(),
            liquidation_min_price: 0.0,
            txn_gas_limit: default_txn_gas_limit(),
            log_overrides: LiquidatorLogOverrides::default(),
        }
    }
}

impl LiquidatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.cr_threshold) {
            return Err(ConfigError::invalid(
                "liquidator.cr_threshold",
                format!("{} is outside [0, 1)", self.cr_threshold),
            ));
        }
        if !self.liquidation_min_price.is_finite() || self.liquidation_min_price < 0.0 {
            return Err(ConfigError::invalid(
                "liquidator.liquidation_min_price",
                format!("{} is negative", self.liquidation_min_price),
            ));
        }
        validate_gas_limit("liquidator.txn_gas_limit", self.txn_gas_limit)
    }
}

/// Disputer log severity overrides, per event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputerLogOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidation_disputed: Option<LogLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_withdrawn: Option<LogLevel>,
}

/// Dispute engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputerConfig {
    /// Seconds to wait after a liquidation before disputing it, giving the
    /// price feed time to cover the liquidation time
    #[serde(default = "default_dispute_delay")]
    pub dispute_delay_secs: u64,

    /// Gas limit for dispute and withdrawal transactions
    #[serde(default = "default_txn_gas_limit")]
    pub txn_gas_limit: u64,

    #[serde(default)]
    pub log_overrides: DisputerLogOverrides,
}

fn default_dispute_delay() -> u64 {
    60
}

impl Default for DisputerConfig {
    fn default() -> Self {
        Self {
            dispute_delay_secs: default_dispute_delay(),
            txn_gas_limit: default_txn_gas_limit(),
            log_overrides: DisputerLogOverrides::default(),
        }
    }
}

impl DisputerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_gas_limit("disputer.txn_gas_limit", self.txn_gas_limit)
    }
}

fn validate_gas_limit(field: &'static str, limit: u64) -> Result<(), ConfigError> {
    if !(MIN_TXN_GAS_LIMIT..MAX_TXN_GAS_LIMIT).contains(&limit) {
        return Err(ConfigError::invalid(
            field,
            format!(
                "{} is outside [{}, {})",
                limit, MIN_TXN_GAS_LIMIT, MAX_TXN_GAS_LIMIT
            ),
        ));
    }
    Ok(())
}
