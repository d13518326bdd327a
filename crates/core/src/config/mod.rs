//! Configuration system for the risk agent.
//!
//! This module provides:
//! - Agent runtime configuration (profiles, polling, state client, gas)
//! - Liquidator and disputer parameters with validation
//! - `${VAR}` expansion for values loaded from TOML

mod agent;
mod engine;
mod env;

pub use agent::{AgentConfig, ClientConfig, GasConfig};
pub use engine::{
    DisputerConfig, DisputerLogOverrides, LiquidatorConfig, LiquidatorLogOverrides, LogLevel,
    MAX_TXN_GAS_LIMIT, MIN_TXN_GAS_LIMIT,
};
pub use env::expand_env;

use std::path::PathBuf;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("{feed_type} price feed is missing required field `{field}`")]
    MissingField {
        feed_type: String,
        field: &'static str,
    },

    #[error("medianizer price feed has no constituent feeds")]
    EmptyMedianizer,

    #[error("unknown price feed type {0:?}")]
    UnknownFeedType(String),

    #[error("price feed configuration nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("no default price feed for identifier {0:?} and none configured")]
    NoPriceFeed(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
