//! Agent runtime configuration with profile support.
//!
//! Profiles (`default`, `testing`, `production`) are selected with the
//! `AGENT_PROFILE` environment variable. A TOML file, when given, replaces
//! the profile; `${VAR}` references in it are expanded before parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::engine::{DisputerConfig, LiquidatorConfig};
use super::{expand_env, ConfigError};
use crate::price_feed::PriceFeedConfig;

/// Main configuration structure containing all agent parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Seconds between cycles; 0 runs a single cycle
    #[serde(default = "default_polling_delay")]
    pub polling_delay_secs: u64,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub liquidator: LiquidatorConfig,

    #[serde(default)]
    pub disputer: DisputerConfig,

    /// Price feed tree. Optional when the contract's identifier has a
    /// built-in feed; an untyped section only overrides fields of that feed,
    /// and a `uniswap` section may leave the pair address to be derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_feed: Option<PriceFeedConfig>,
}

fn default_profile_name() -> String {
    "default".to_string()
}
fn default_polling_delay() -> u64 {
    60
}

/// State client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// A non-forced refresh within this many seconds of the last one is a no-op
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,

    /// First block scanned for sponsor and liquidation events
    #[serde(default)]
    pub start_block: u64,

    /// Upper bound on sponsors whose state is read at the same time
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

fn default_staleness_threshold() -> u64 {
    10
}
fn default_max_concurrent_reads() -> usize {
    16
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: default_staleness_threshold(),
            start_block: 0,
            max_concurrent_reads: default_max_concurrent_reads(),
        }
    }
}

impl ClientConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

/// Gas estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasConfig {
    /// Multiplier applied to the node's gas price
    #[serde(default = "default_gas_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_floor_gwei")]
    pub floor_gwei: f64,

    #[serde(default = "default_cap_gwei")]
    pub cap_gwei: f64,

    /// Minimum seconds between gas price refreshes
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
}

fn default_gas_multiplier() -> f64 {
    1.0
}
fn default_floor_gwei() -> f64 {
    1.0
}
fn default_cap_gwei() -> f64 {
    1000.0
}
fn default_update_interval() -> u64 {
    60
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            multiplier: default_gas_multiplier(),
            floor_gwei: default_floor_gwei(),
            cap_gwei: default_cap_gwei(),
            update_interval_secs: default_update_interval(),
        }
    }
}

impl GasConfig {
    pub fn floor_wei(&self) -> u128 {
        (self.floor_gwei * 1e9) as u128
    }

    pub fn cap_wei(&self) -> u128 {
        (self.cap_gwei * 1e9) as u128
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(ConfigError::invalid(
                "gas.multiplier",
                format!("{} must be positive", self.multiplier),
            ));
        }
        if !(self.floor_gwei >= 0.0 && self.floor_gwei <= self.cap_gwei) {
            return Err(ConfigError::invalid(
                "gas.floor_gwei",
                format!("{} must be within [0, cap_gwei]", self.floor_gwei),
            ));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            polling_delay_secs: default_polling_delay(),
            client: ClientConfig::default(),
            gas: GasConfig::default(),
            liquidator: LiquidatorConfig::default(),
            disputer: DisputerConfig::default(),
            price_feed: None,
        }
    }
}

impl AgentConfig {
    /// Parse TOML text, expanding `${VAR}` references first, and validate it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(&expand_env(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Create a testing profile: fast polling, no refresh throttling.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            polling_delay_secs: 10,
            client: ClientConfig {
                staleness_threshold_secs: 0,
                ..Default::default()
            },
            gas: GasConfig {
                update_interval_secs: 10,
                ..Default::default()
            },
            liquidator: LiquidatorConfig {
                cr_threshold: 0.0,
                ..Default::default()
            },
            disputer: DisputerConfig {
                dispute_delay_secs: 0,
                ..Default::default()
            },
            price_feed: None,
        }
    }

    /// Create a production profile with conservative settings.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            polling_delay_secs: 60,
            client: ClientConfig::default(),
            gas: GasConfig {
                multiplier: 1.1,
                ..Default::default()
            },
            liquidator: LiquidatorConfig {
                cr_threshold: 0.05,
                ..Default::default()
            },
            disputer: DisputerConfig {
                dispute_delay_secs: 120,
                ..Default::default()
            },
            price_feed: None,
        }
    }

    /// Get profile from environment variable AGENT_PROFILE, or default.
    /// Supported values: testing, production
    pub fn from_env() -> Self {
        let profile = std::env::var("AGENT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::profile(&profile)
    }

    fn profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// File configuration when a path is given, otherwise the environment profile.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::from_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn polling_delay(&self) -> Duration {
        Duration::from_secs(self.polling_delay_secs)
    }

    /// Validate every section once, failing on the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.liquidator.validate()?;
        self.disputer.validate()?;
        self.gas.validate()?;
        // Partial sections are completed and checked once the contract is known
        if let Some(price_feed) = &self.price_feed {
            if !matches!(price_feed.feed_type.as_deref(), None | Some("uniswap")) {
                price_feed.validate()?;
            }
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(
            at = "AgentConfig",
            profile = %self.profile,
            polling_delay_secs = self.polling_delay_secs,
            staleness_threshold_secs = self.client.staleness_threshold_secs,
            start_block = self.client.start_block,
            "Agent configuration loaded"
        );
        tracing::info!(
            at = "AgentConfig",
            cr_threshold = self.liquidator.cr_threshold,
            liquidation_deadline_secs = self.liquidator.liquidation_deadline_secs,
            liquidation_min_price = self.liquidator.liquidation_min_price,
            txn_gas_limit = self.liquidator.txn_gas_limit,
            "Liquidator parameters"
        );
        tracing::info!(
            at = "AgentConfig",
            dispute_delay_secs = self.disputer.dispute_delay_secs,
            txn_gas_limit = self.disputer.txn_gas_limit,
            "Disputer parameters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.polling_delay_secs, 60);
        assert_eq!(config.client.staleness_threshold_secs, 10);
        assert_eq!(config.liquidator.cr_threshold, 0.02);
        assert_eq!(config.disputer.dispute_delay_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profiles() {
        assert_eq!(AgentConfig::profile("test").profile, "testing");
        assert_eq!(AgentConfig::profile("PROD").profile, "production");
        assert_eq!(AgentConfig::profile("whatever").profile, "default");
        assert!(AgentConfig::testing().validate().is_ok());
        assert!(AgentConfig::production().validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        std::env::set_var("AGENT_CONFIG_TEST_EXCHANGE", "kraken");
        let config = AgentConfig::from_toml(
            r#"
            profile = "custom"
            polling_delay_secs = 0

            [liquidator]
            cr_threshold = 0.1

            [price_feed]
            type = "cryptowatch"
            exchange = "${AGENT_CONFIG_TEST_EXCHANGE}"
            pair = "ethusd"
            lookback = 7200
            min_time_between_updates = 60
            "#,
        )
        .unwrap();
        std::env::remove_var("AGENT_CONFIG_TEST_EXCHANGE");

        assert_eq!(config.profile, "custom");
        assert_eq!(config.polling_delay(), Duration::ZERO);
        assert_eq!(config.liquidator.cr_threshold, 0.1);
        assert_eq!(config.disputer.dispute_delay_secs, 60);
        let feed = config.price_feed.unwrap();
        assert_eq!(feed.exchange.as_deref(), Some("kraken"));
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let err = AgentConfig::from_toml("[liquidator]\ncr_threshold = 1.5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "liquidator.cr_threshold",
                ..
            }
        ));

        let err = AgentConfig::from_toml("[price_feed]\ntype = \"medianizer\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyMedianizer));
    }

    #[test]
    fn test_partial_price_feed_sections_load() {
        let config = AgentConfig::from_toml("[price_feed]\napi_key = \"key\"\nlookback = 3600\n").unwrap();
        let feed = config.price_feed.unwrap();
        assert_eq!(feed.feed_type, None);
        assert_eq!(feed.lookback, Some(3600));

        let config = AgentConfig::from_toml("[price_feed]\ntype = \"uniswap\"\ntwap_length = 600\n").unwrap();
        assert_eq!(config.price_feed.unwrap().twap_length, Some(600));
    }

    #[test]
    fn test_from_file_missing() {
        let err = AgentConfig::from_file("/nonexistent/agent.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_serialization() {
        let config = AgentConfig::testing();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"testing\""));
    }

    #[test]
    fn test_gas_bounds() {
        let gas = GasConfig::default();
        assert_eq!(gas.floor_wei(), 1_000_000_000);
        assert_eq!(gas.cap_wei(), 1_000_000_000_000);

        let bad = GasConfig {
            floor_gwei: 2000.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
